//! Radio backend abstraction layer

pub mod mock_backend;
pub mod radio_backend;
pub mod wifi_ctrl_backend;

pub use radio_backend::RadioBackend;
pub use wifi_ctrl_backend::WifiCtrlBackend;

#[cfg(test)]
pub use mock_backend::MockRadioBackend;
