//! Tests of Feff path files, path evaluation and complete fits

// Reading feffNNNN.dat files
mod feffdat_tests;

// Single and multiple dataset fits of synthetic spectra
mod fit_tests;
