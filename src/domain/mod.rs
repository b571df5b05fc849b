//! Domain layer: devices, datastreams, readings, alarm rules and state,
//! live-update frames, and the shared state board.
//!
//! These types are shared by every stage of the pipeline and carry no
//! I/O of their own.

pub mod alarm;
pub mod datastream;
pub mod device;
pub mod live_event;
pub mod reading;
pub mod state_board;

pub use alarm::{AlarmRule, AlarmState, AlarmStatus, AlarmTransition, Condition, RuleId};
pub use datastream::{Datastream, DatastreamKey, ValueType};
pub use device::{Device, DeviceId, Liveness, UserId};
pub use live_event::LiveEvent;
pub use reading::{RawRecord, Reading};
pub use state_board::{AlarmSnapshot, DeviceLivenessView, DeviceMemory, StateBoard};
