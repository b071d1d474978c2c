pub mod common;
pub mod display;
pub mod error;
pub mod lifecycle;
pub mod mount;
pub mod project;
pub mod session;

pub use common::Globals;
pub use lifecycle::{handle_destroy, handle_down, handle_restart, handle_up, handle_update_hosts};
pub use mount::{handle_mount, handle_umount};
pub use project::{handle_info, handle_init, handle_list, handle_update};
pub use session::{handle_env, handle_logs, handle_ps, handle_run, handle_shell};
