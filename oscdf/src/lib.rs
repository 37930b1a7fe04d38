// src/lib.rs
pub mod data {
    pub mod resample;
    pub mod welch;
    pub mod background;
    pub mod profiler;
    pub mod loader;
}

pub mod sim {
    pub mod synthetic;
}
