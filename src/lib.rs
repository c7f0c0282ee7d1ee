//! Paired-MNIST digit comparison: pair construction, three network families,
//! training, multi-seed evaluation and hyperparameter grid search.

pub mod augment;
pub mod config;
pub mod device;
pub mod error;
pub mod evaluate;
pub mod experiment;
pub mod grid_search;
pub mod metrics;
pub mod mnist;
pub mod models;
pub mod network;
pub mod pairs;
pub mod plot;
pub mod rng;
pub mod training;
