// Murmur: coordinated-behavior detection for social platforms
//
// This is the library root. Each module corresponds to a stage of the
// per-bucket analysis: posts come in through `platforms`, are compared in
// `similarity`, become an account graph in `graph`, are scored in `scoring`
// and stored through `db`. `pipeline` drives the stages over a time range.

pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod output;
pub mod pipeline;
pub mod platforms;
pub mod scoring;
pub mod similarity;
pub mod status;
