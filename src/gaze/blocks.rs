//! Camera Block Tracking
//!
//! The external camera reports detected objects as blocks on its own
//! 316×208 grid. [`ScreenBlock`] scales one of those to device screen
//! space; [`BlockTracker`] keeps the current set, hit-tests every gaze
//! sample against it, and commits a selection to the peer through the
//! connection manager.

use tracing::info;

use crate::gaze::GazeCoordinates;
use crate::network::ConnectionManager;

/// Horizontal resolution of the camera's block grid
pub const CAMERA_RESOLUTION_X: u32 = 316;

/// Vertical resolution of the camera's block grid
pub const CAMERA_RESOLUTION_Y: u32 = 208;

/// Id value meaning "no block under the gaze"
pub const NO_BLOCK: i32 = -1;

/// One object detected by the camera, in camera-grid space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBlock {
    /// Signature number or color-code number
    pub signature: i32,
    /// Center x, between 0 and 315
    pub x: i32,
    /// Center y, between 0 and 207
    pub y: i32,
    /// Width, up to the grid width
    pub width: i32,
    /// Height, up to the grid height
    pub height: i32,
    /// Color-code angle in degrees, 0 for plain signatures
    pub angle: i32,
    /// Tracking index; stable while the camera tracks the object
    pub index: i32,
    /// Number of frames the block has been tracked, saturating at 255
    pub age: i32,
}

/// A target block scaled to screen space with center-based bounds
#[derive(Debug, Clone)]
pub struct ScreenBlock {
    /// Tracking id (the camera's block index)
    pub id: i32,
    pub width: i32,
    pub height: i32,
    x_start: i32,
    x_end: i32,
    y_start: i32,
    y_end: i32,
    gaze_within: bool,
}

impl ScreenBlock {
    /// Scale a camera block to the given screen resolution
    pub fn from_target(block: &TargetBlock, resolution: (u32, u32)) -> Self {
        let scale = resolution.0 as f32 / CAMERA_RESOLUTION_X as f32;

        let x = (block.x as f32 * scale).round() as i32;
        let y = (block.y as f32 * scale).round() as i32;
        let width = (block.width as f32 * scale).round() as i32;
        let height = (block.height as f32 * scale).round() as i32;

        Self {
            id: block.index,
            width,
            height,
            x_start: x - width / 2,
            x_end: x + width / 2,
            y_start: y - height / 2,
            y_end: y + height / 2,
            gaze_within: false,
        }
    }

    /// Top-left corner of the block on screen
    pub fn origin(&self) -> (i32, i32) {
        (self.x_start, self.y_start)
    }

    /// Whether the last valid gaze sample fell inside this block
    pub fn gaze_within(&self) -> bool {
        self.gaze_within
    }

    /// Hit-test one gaze sample. Invalid samples leave the flag untouched.
    pub fn on_gaze(&mut self, gaze: GazeCoordinates) {
        if gaze.is_invalid() {
            return;
        }
        let gx = gaze.x.round() as i32;
        let gy = gaze.y.round() as i32;
        self.gaze_within = (self.x_start..=self.x_end).contains(&gx)
            && (self.y_start..=self.y_end).contains(&gy);
    }
}

/// Tracks the current block set and which block the user is gazing at
pub struct BlockTracker {
    resolution: (u32, u32),
    blocks: Vec<ScreenBlock>,
    gazed_block_id: i32,
}

impl BlockTracker {
    /// Create a tracker for the given screen resolution
    pub fn new(resolution: (u32, u32)) -> Self {
        Self {
            resolution,
            blocks: Vec::new(),
            gazed_block_id: NO_BLOCK,
        }
    }

    /// Replace the tracked set with a fresh camera report
    pub fn set_blocks(&mut self, targets: &[TargetBlock]) {
        self.blocks = targets
            .iter()
            .map(|target| ScreenBlock::from_target(target, self.resolution))
            .collect();
    }

    /// Currently tracked blocks, in report order
    pub fn blocks(&self) -> &[ScreenBlock] {
        &self.blocks
    }

    /// Id of the block under the last gaze sample, or [`NO_BLOCK`]
    pub fn gazed_block_id(&self) -> i32 {
        self.gazed_block_id
    }

    /// Hit-test a gaze sample against every block; the last hit wins
    pub fn on_gaze(&mut self, gaze: GazeCoordinates) {
        self.gazed_block_id = NO_BLOCK;
        for block in &mut self.blocks {
            block.on_gaze(gaze);
            if block.gaze_within() {
                self.gazed_block_id = block.id;
            }
        }
    }

    /// Commit a selection: send the target id to the peer as one raw byte.
    ///
    /// Committing [`NO_BLOCK`] is a no-op.
    pub async fn commit_selection(&self, manager: &ConnectionManager, id: i32) {
        if id == NO_BLOCK {
            return;
        }
        info!("block {id} selected");
        manager.send_raw(&[id as u8]).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(index: i32, x: i32, y: i32, width: i32, height: i32) -> TargetBlock {
        TargetBlock {
            signature: 1,
            x,
            y,
            width,
            height,
            angle: 0,
            index,
            age: 10,
        }
    }

    #[test]
    fn test_scaling_to_screen_space() {
        // 632 screen pixels over a 316 grid: everything doubles
        let block = ScreenBlock::from_target(&target(3, 100, 50, 40, 20), (632, 400));
        assert_eq!(block.width, 80);
        assert_eq!(block.height, 40);
        assert_eq!(block.origin(), (200 - 40, 100 - 20));
    }

    #[test]
    fn test_hit_test_bounds() {
        let mut block = ScreenBlock::from_target(&target(1, 100, 100, 40, 40), (316, 208));

        block.on_gaze(GazeCoordinates::new(100.0, 100.0));
        assert!(block.gaze_within());

        block.on_gaze(GazeCoordinates::new(300.0, 100.0));
        assert!(!block.gaze_within());
    }

    #[test]
    fn test_invalid_gaze_leaves_flag() {
        let mut block = ScreenBlock::from_target(&target(1, 100, 100, 40, 40), (316, 208));
        block.on_gaze(GazeCoordinates::new(100.0, 100.0));
        assert!(block.gaze_within());

        block.on_gaze(GazeCoordinates::invalid());
        assert!(block.gaze_within());
    }

    #[test]
    fn test_tracker_reports_gazed_block() {
        let mut tracker = BlockTracker::new((316, 208));
        tracker.set_blocks(&[
            target(1, 50, 50, 20, 20),
            target(2, 150, 150, 20, 20),
        ]);

        tracker.on_gaze(GazeCoordinates::new(150.0, 150.0));
        assert_eq!(tracker.gazed_block_id(), 2);

        tracker.on_gaze(GazeCoordinates::new(5.0, 5.0));
        assert_eq!(tracker.gazed_block_id(), NO_BLOCK);
    }

    #[test]
    fn test_set_blocks_replaces() {
        let mut tracker = BlockTracker::new((316, 208));
        tracker.set_blocks(&[target(1, 50, 50, 20, 20)]);
        assert_eq!(tracker.blocks().len(), 1);

        tracker.set_blocks(&[target(2, 60, 60, 20, 20), target(3, 80, 80, 20, 20)]);
        assert_eq!(tracker.blocks().len(), 2);
    }
}
