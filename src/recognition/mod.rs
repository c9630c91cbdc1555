pub mod controller;
pub mod state;

pub use controller::{RecognitionController, RecognitionSnapshot};
pub use state::{RecognitionState, RecognitionStatus};
