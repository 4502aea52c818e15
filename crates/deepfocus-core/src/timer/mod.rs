mod callbacks;
mod clock;
mod engine;
mod record;
mod registry;
mod settings;


pub use callbacks::{TimerCallbacks, TimerConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::SessionTimer;
pub use record::{
    session_id_from_key, storage_key, TimerRecord, TimerState, RECORD_VERSION,
    STORAGE_KEY_PREFIX,
};
pub use registry::{TimerEnv, TimerRegistry};
pub use settings::TimerSettings;
