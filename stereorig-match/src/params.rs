//! Live-tunable matching parameters.

use serde::Deserialize;
use std::fmt;

/// Disparity change per tuning command.
pub const DISPARITY_STEP: i32 = 1;
/// Sobel limit change per tuning command.
pub const SOBEL_LIMIT_STEP: i32 = 10;
/// Block size change per tuning command.
pub const BLOCK_SIZE_STEP: i32 = 1;
/// SAD threshold change per tuning command.
pub const SAD_THRESHOLD_STEP: i32 = 1;

/// Parameters handed to the matching engine each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StereoParameters {
    /// Horizontal shift searched, in pixels.
    pub disparity: i32,
    /// Minimum edge strength for a match candidate.
    pub sobel_limit: i32,
    /// Comparison window extent, in pixels.
    pub block_size: i32,
    /// Maximum dissimilarity accepted.
    pub sad_threshold: i32,
}

impl Default for StereoParameters {
    fn default() -> Self {
        Self {
            disparity: 30,
            sobel_limit: 260,
            block_size: 5,
            sad_threshold: 79,
        }
    }
}

impl fmt::Display for StereoParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "disparity = {}, sobelLimit = {}, blockSize = {}, sadThreshold = {}",
            self.disparity, self.sobel_limit, self.block_size, self.sad_threshold
        )
    }
}

/// Inclusive `(min, max)` limits for every parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterBounds {
    pub disparity: (i32, i32),
    pub sobel_limit: (i32, i32),
    pub block_size: (i32, i32),
    pub sad_threshold: (i32, i32),
}

impl Default for ParameterBounds {
    fn default() -> Self {
        Self {
            disparity: (0, 255),
            sobel_limit: (0, 10_000),
            block_size: (1, 63),
            sad_threshold: (0, 255),
        }
    }
}

impl ParameterBounds {
    /// Clamp every field into range.
    pub fn clamp(&self, params: StereoParameters) -> StereoParameters {
        StereoParameters {
            disparity: params.disparity.clamp(self.disparity.0, self.disparity.1),
            sobel_limit: params.sobel_limit.clamp(self.sobel_limit.0, self.sobel_limit.1),
            block_size: params.block_size.clamp(self.block_size.0, self.block_size.1),
            sad_threshold: params
                .sad_threshold
                .clamp(self.sad_threshold.0, self.sad_threshold.1),
        }
    }
}

/// One discrete tuning event, independent of the input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TuningCommand {
    IncreaseDisparity,
    DecreaseDisparity,
    IncreaseSobelLimit,
    DecreaseSobelLimit,
    IncreaseBlockSize,
    DecreaseBlockSize,
    IncreaseSadThreshold,
    DecreaseSadThreshold,
    Quit,
}

impl TuningCommand {
    /// Map a keypress to a command using the rig's historical bindings.
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            'R' => Some(Self::IncreaseDisparity),
            'T' => Some(Self::DecreaseDisparity),
            'w' => Some(Self::IncreaseSobelLimit),
            's' => Some(Self::DecreaseSobelLimit),
            'g' => Some(Self::IncreaseBlockSize),
            'b' => Some(Self::DecreaseBlockSize),
            'y' => Some(Self::IncreaseSadThreshold),
            'h' => Some(Self::DecreaseSadThreshold),
            'q' => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Result of applying a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningOutcome {
    /// A field moved.
    Changed,
    /// The field was already at its bound.
    Unchanged,
    /// The command asks the loop to stop.
    Quit,
}

/// Holds the current parameters. Written only by tuning commands.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    current: StereoParameters,
    bounds: ParameterBounds,
}

impl ParameterStore {
    pub fn new(initial: StereoParameters) -> Self {
        Self::with_bounds(initial, ParameterBounds::default())
    }

    /// Initial values are clamped into `bounds`.
    pub fn with_bounds(initial: StereoParameters, bounds: ParameterBounds) -> Self {
        Self {
            current: bounds.clamp(initial),
            bounds,
        }
    }

    /// Apply one command: exactly one field moves by its fixed step.
    pub fn apply(&mut self, command: TuningCommand) -> TuningOutcome {
        let mut next = self.current;
        match command {
            TuningCommand::IncreaseDisparity => next.disparity += DISPARITY_STEP,
            TuningCommand::DecreaseDisparity => next.disparity -= DISPARITY_STEP,
            TuningCommand::IncreaseSobelLimit => next.sobel_limit += SOBEL_LIMIT_STEP,
            TuningCommand::DecreaseSobelLimit => next.sobel_limit -= SOBEL_LIMIT_STEP,
            TuningCommand::IncreaseBlockSize => next.block_size += BLOCK_SIZE_STEP,
            TuningCommand::DecreaseBlockSize => next.block_size -= BLOCK_SIZE_STEP,
            TuningCommand::IncreaseSadThreshold => next.sad_threshold += SAD_THRESHOLD_STEP,
            TuningCommand::DecreaseSadThreshold => next.sad_threshold -= SAD_THRESHOLD_STEP,
            TuningCommand::Quit => return TuningOutcome::Quit,
        }

        let next = self.bounds.clamp(next);
        if next == self.current {
            return TuningOutcome::Unchanged;
        }
        self.current = next;
        TuningOutcome::Changed
    }

    /// Copy of the current parameters for this cycle.
    pub fn snapshot(&self) -> StereoParameters {
        self.current
    }

    pub fn bounds(&self) -> &ParameterBounds {
        &self.bounds
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(StereoParameters::default())
    }
}
