//! Frame upload into per-ring-slot resources.
//!
//! The renderer keeps a fixed ring of `frames_in_flight` resource slots so the
//! CPU can prepare one frame while the GPU still consumes another. The
//! pipeline's only obligation is ordering: for each slot it waits, uploads and
//! records the dispatch, strictly in that order, and never touches a slot
//! again before it has been waited on. Everything GPU-specific lives behind
//! [`FrameUploader`].

use crate::color::YuvOverlay;
use crate::pixel_format::PixelFormatPlan;
use crate::video::{DecodedFrame, VideoError};

/// Default number of frames in flight.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Consumer of normalized frames.
pub trait FrameUploader {
    /// Called before the first upload and whenever the frame layout changes.
    /// Every buffer sized from the previous plan must be recreated.
    fn configure(&mut self, plan: &PixelFormatPlan) -> Result<(), VideoError>;

    /// Blocks until the previous work recorded for `slot` has completed.
    fn wait_slot(&mut self, _slot: usize) -> Result<(), VideoError> {
        Ok(())
    }

    /// Copies `frame` into the resources of `slot`.
    fn upload(&mut self, slot: usize, frame: &DecodedFrame) -> Result<(), VideoError>;

    /// Records the conversion/compositing work for `slot`.
    fn record_dispatch(&mut self, slot: usize) -> Result<(), VideoError>;
}

/// Rotation over the frames-in-flight slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRing {
    frames_in_flight: usize,
    next: usize,
}

impl FrameRing {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            next: 0,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Returns the slot for the next frame and advances the ring.
    pub fn next_slot(&mut self) -> usize {
        let slot = self.next;
        self.next = (self.next + 1) % self.frames_in_flight;
        slot
    }
}

/// Uploads `frame` into the next ring slot, honouring per-slot ordering.
pub fn present_frame<U: FrameUploader>(
    uploader: &mut U,
    ring: &mut FrameRing,
    current_plan: &mut Option<PixelFormatPlan>,
    frame: &DecodedFrame,
) -> Result<usize, VideoError> {
    if current_plan.as_ref() != Some(&frame.plan) {
        tracing::debug!(
            "Frame layout now {} {}x{} ({} bytes), reconfiguring uploader",
            frame.plan.output.as_str(),
            frame.plan.width,
            frame.plan.height,
            frame.plan.total_bytes
        );
        uploader.configure(&frame.plan)?;
        *current_plan = Some(frame.plan);
    }

    let slot = ring.next_slot();
    uploader.wait_slot(slot)?;
    uploader.upload(slot, frame)?;
    uploader.record_dispatch(slot)?;
    Ok(slot)
}

/// One slot of a [`CpuUploader`].
#[derive(Debug, Clone, Default)]
pub struct CpuSlot {
    pub y_plane: Vec<u8>,
    pub uv_plane: Vec<u8>,
    pub pts_seconds: f64,
    /// Dispatch recorded and not yet waited on
    pub in_flight: bool,
    /// Uploads into this slot
    pub uploads: u64,
}

/// System-memory [`FrameUploader`].
///
/// Keeps one Y and one UV staging plane per slot, applies an optional overlay
/// and enforces the slot ordering contract, reporting violations as errors.
#[derive(Debug, Clone)]
pub struct CpuUploader {
    slots: Vec<CpuSlot>,
    plan: Option<PixelFormatPlan>,
    overlay: Option<YuvOverlay>,
    dispatches: u64,
}

impl CpuUploader {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            slots: vec![CpuSlot::default(); frames_in_flight.max(1)],
            plan: None,
            overlay: None,
            dispatches: 0,
        }
    }

    pub fn set_overlay(&mut self, overlay: Option<YuvOverlay>) {
        self.overlay = overlay;
    }

    pub fn slot(&self, slot: usize) -> Option<&CpuSlot> {
        self.slots.get(slot)
    }

    pub fn plan(&self) -> Option<&PixelFormatPlan> {
        self.plan.as_ref()
    }

    pub fn dispatches(&self) -> u64 {
        self.dispatches
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut CpuSlot, VideoError> {
        let count = self.slots.len();
        self.slots
            .get_mut(slot)
            .ok_or_else(|| VideoError::Upload(format!("slot {slot} out of range (ring of {count})")))
    }
}

impl FrameUploader for CpuUploader {
    fn configure(&mut self, plan: &PixelFormatPlan) -> Result<(), VideoError> {
        for slot in &mut self.slots {
            slot.y_plane = vec![0; plan.y_plane_bytes];
            slot.uv_plane = vec![0; plan.uv_plane_bytes];
        }
        self.plan = Some(*plan);
        Ok(())
    }

    fn wait_slot(&mut self, slot: usize) -> Result<(), VideoError> {
        self.slot_mut(slot)?.in_flight = false;
        Ok(())
    }

    fn upload(&mut self, slot: usize, frame: &DecodedFrame) -> Result<(), VideoError> {
        let Some(plan) = self.plan else {
            return Err(VideoError::Upload("upload before configure".to_string()));
        };
        if frame.plan != plan {
            return Err(VideoError::Upload("frame layout differs from configured layout".to_string()));
        }
        if frame.data.len() < plan.total_bytes {
            return Err(VideoError::Upload(format!(
                "frame holds {} bytes, layout needs {}",
                frame.data.len(),
                plan.total_bytes
            )));
        }

        let overlay = self.overlay.clone();
        let target = self.slot_mut(slot)?;
        if target.in_flight {
            return Err(VideoError::Upload(format!("slot {slot} written while still in flight")));
        }

        let y_bytes = plan.y_plane_bytes;
        match overlay {
            Some(overlay) => {
                let mut composed = frame.data[..plan.total_bytes].to_vec();
                overlay.apply(&plan, &mut composed);
                target.y_plane.copy_from_slice(&composed[..y_bytes]);
                target.uv_plane.copy_from_slice(&composed[y_bytes..]);
            }
            None => {
                target.y_plane.copy_from_slice(&frame.data[..y_bytes]);
                target.uv_plane.copy_from_slice(&frame.data[y_bytes..plan.total_bytes]);
            }
        }
        target.pts_seconds = frame.pts_seconds;
        target.uploads += 1;
        Ok(())
    }

    fn record_dispatch(&mut self, slot: usize) -> Result<(), VideoError> {
        self.slot_mut(slot)?.in_flight = true;
        self.dispatches += 1;
        Ok(())
    }
}
