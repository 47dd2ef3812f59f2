mod controller;

pub use controller::{HistoryController, HistoryLoadState, HistoryWrite, RestoredGeneration};
