/// Readiness of the persistent store as seen by the rest of the app.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStatus {
    pub is_initialized: bool,
    pub is_ready: bool,
    pub error: Option<String>,
}

impl StoreStatus {
    pub fn ready() -> Self {
        Self {
            is_initialized: true,
            is_ready: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            is_initialized: true,
            is_ready: false,
            error: Some(error.into()),
        }
    }
}
