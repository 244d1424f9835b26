// Core modules implementing decoding, worker scheduling, and error modeling.
pub mod cancel;
pub mod decode;
pub mod error;
pub mod pool;
pub mod progress;
pub mod record;
