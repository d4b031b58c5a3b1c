//! Phone-number pairing and the lifecycle of the session it produces.
//!
//! A request enters through [`PairingCoordinator::pair`], which creates a
//! fresh credentials directory, connects, and returns the pairing code.
//! Once the paired account opens the connection the credentials are exported
//! and the directory is deleted.

pub mod code;
pub mod coordinator;
pub mod exporter;
pub mod gate;
pub mod lifecycle;
pub mod session;

pub use code::{PairingCode, format_pairing_code, normalize_phone_number};
pub use coordinator::{
    CoordinatorSettings, PairingCoordinator, PairingOutcome, PairingServices, ReconnectPolicy,
};
pub use exporter::{ExportResult, SESSION_ID_ERROR_MARKER, SessionExporter};
pub use gate::RequestGate;
pub use lifecycle::LifecycleState;
pub use session::{ActiveSession, SessionManager, SessionSnapshot};
