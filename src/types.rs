use std::time::Instant;

/// Number of landmarks in one hand skeleton.
pub const NUM_LANDMARKS: usize = 21;

/// The detector never tracks more hands than this.
pub const MAX_HANDS: usize = 2;

pub const WRIST: usize = 0;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// True when the dimensions are non-zero and the buffer holds exactly one
    /// RGBA pixel per position.
    pub fn is_drawable(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgba.len() == (self.width as usize) * (self.height as usize) * 4
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl LandmarkPoint {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn label(&self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
        }
    }

    pub fn from_score(score: f32) -> Self {
        if score >= 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }
}

/// Landmarks of one detected hand in normalized image coordinates.
///
/// Indexing is anatomical: 0 is the wrist, 4/8/12/16/20 are the thumb, index,
/// middle, ring and pinky tips, and `tip - 1` is the joint right below each tip.
/// Missing landmarks are carried as non-finite coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct HandLandmarkSet {
    pub points: Vec<LandmarkPoint>,
    pub handedness: Handedness,
}

impl HandLandmarkSet {
    pub fn new(points: Vec<LandmarkPoint>, handedness: Handedness) -> Self {
        Self { points, handedness }
    }

    /// Returns the landmark at `index` if it exists and carries finite coordinates.
    pub fn point(&self, index: usize) -> Option<LandmarkPoint> {
        self.points.get(index).copied().filter(LandmarkPoint::is_finite)
    }

    pub fn is_complete(&self) -> bool {
        self.points.len() >= NUM_LANDMARKS
    }
}

/// Hands detected in a single submitted frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionBatch {
    pub hands: Vec<HandLandmarkSet>,
}

impl DetectionBatch {
    pub fn new(mut hands: Vec<HandLandmarkSet>) -> Self {
        hands.truncate(MAX_HANDS);
        Self { hands }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hands.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Pinky,
    ];

    pub fn tip_index(&self) -> usize {
        match self {
            Finger::Thumb => 4,
            Finger::Index => 8,
            Finger::Middle => 12,
            Finger::Ring => 16,
            Finger::Pinky => 20,
        }
    }

    /// Joint immediately proximal to the tip.
    pub fn joint_index(&self) -> usize {
        self.tip_index() - 1
    }
}

/// Where and how to draw one nail sprite in one frame.
///
/// `x`/`y` are pixel coordinates of the fingertip, `angle` is in radians and
/// `scale` is the drawn sprite edge length in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FingertipTransform {
    pub hand: usize,
    pub finger: Finger,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub scale: f32,
}
