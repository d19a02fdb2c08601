pub mod autocalibration;
pub mod camera;
pub mod config;
pub mod controller;
pub mod error;
pub mod export;
pub mod feature;
pub mod io;
pub mod keyframes;
pub mod mapping;
pub mod matching;
pub mod neighbor;
pub mod reconstruction;
pub mod sequence;
pub mod solvers;
pub mod track_graph;

pub type ImageId = u32;
pub type TrackId = u32;

pub use error::{Result, SfmError};
