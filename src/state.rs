#[derive(Debug, PartialEq, Clone, Copy)]
pub enum FrameState {
    Starting,      // Nothing shown since launch
    ShowingPhotos, // Rotating through the index
    Placeholder,   // Index empty, "No Photos Found" is on the panel
}

impl FrameState {
    pub fn name(&self) -> &'static str {
        match self {
            FrameState::Starting => "starting",
            FrameState::ShowingPhotos => "showing photos",
            FrameState::Placeholder => "placeholder",
        }
    }
}
