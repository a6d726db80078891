pub mod actions;
pub mod cdp;
pub mod channel;
pub mod format;
pub mod launch;
pub mod script;
pub mod snapshot;
pub mod tabs;
pub mod wait;

pub use actions::BrowserController;
pub use cdp::{CdpClient, CdpEvent};
pub use channel::DebuggerChannel;
pub use format::format_snapshot;
pub use launch::BrowserProcess;
pub use snapshot::{take_snapshot, PageSnapshot, SelectOption, SnapshotElement};
pub use tabs::{TabId, TabRegistry, TabState, TabStatus, TabUpdate};
