pub mod engine;
pub mod error;
pub mod nn;

pub use engine::{Op, Value, ValueId, ValueType};
pub use error::{GradError, Result};
pub use nn::{Activation, Layer, Mlp, Module, Neuron};

use std::sync::atomic::{AtomicUsize, Ordering};

///
/// NOTE: Refer safe singleton globals in Rust: https://stackoverflow.com/a/27826181/6196679
///
fn get_id() -> usize {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
