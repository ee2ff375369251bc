/// Per-span limits on recorded data.
///
/// Each limit bounds one span field independently; overflowing one never
/// affects another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceParams {
    /// Maximum attributes per span
    pub max_number_of_attributes: usize,
    /// Maximum annotations per span
    pub max_number_of_annotations: usize,
    /// Maximum message events per span
    pub max_number_of_message_events: usize,
    /// Maximum links per span
    pub max_number_of_links: usize,
}

impl Default for TraceParams {
    fn default() -> Self {
        Self {
            max_number_of_attributes: 32,
            max_number_of_annotations: 32,
            max_number_of_message_events: 128,
            max_number_of_links: 32,
        }
    }
}

impl TraceParams {
    #[must_use]
    pub fn with_max_attributes(mut self, max: usize) -> Self {
        self.max_number_of_attributes = max;
        self
    }

    #[must_use]
    pub fn with_max_annotations(mut self, max: usize) -> Self {
        self.max_number_of_annotations = max;
        self
    }

    #[must_use]
    pub fn with_max_message_events(mut self, max: usize) -> Self {
        self.max_number_of_message_events = max;
        self
    }

    #[must_use]
    pub fn with_max_links(mut self, max: usize) -> Self {
        self.max_number_of_links = max;
        self
    }
}
