//! Clustering used to train both the coarse quantizer and the PQ codebooks.

pub mod kmeans;

pub use kmeans::{KMeans, KMeansInit, KMeansParams};
