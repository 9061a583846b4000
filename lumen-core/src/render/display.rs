//! Picture display queue.
//!
//! Decoded pictures arrive one per armed picture-ready wait. The queue
//! admits pictures newer than the last one displayed, keeps at most one
//! paint in flight and, whenever it paints, shows only the freshest
//! pending picture.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::control::{ControlSender, PictureCallback, SwapCallback};
use crate::error::StreamError;
use crate::render::renderer::Renderer;
use crate::video::decoder::{Picture, PictureError, PictureResult, VideoDecoder};

pub struct DisplayQueue {
    pending: VecDeque<Picture>,
    painting: bool,
    last_displayed: Option<u32>,
    renderer: Renderer,
    decoder: Arc<dyn VideoDecoder>,
    events: ControlSender,
}

impl DisplayQueue {
    pub fn new(renderer: Renderer, decoder: Arc<dyn VideoDecoder>, events: ControlSender) -> Self {
        Self {
            pending: VecDeque::new(),
            painting: false,
            last_displayed: None,
            renderer,
            decoder,
            events,
        }
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_painting(&self) -> bool {
        self.painting
    }

    /// Decode id of the last picture a paint was issued for.
    pub fn last_displayed(&self) -> Option<u32> {
        self.last_displayed
    }

    /// The decoder is ready: reset per-session state and arm the first
    /// picture-ready wait.
    pub fn start(&mut self) {
        self.last_displayed = None;
        self.renderer.reset();
        self.arm();
    }

    fn arm(&self) {
        self.decoder
            .get_picture(PictureCallback::picture_ready(self.events.clone()));
    }

    /// Queue `picture` if it is newer than the last displayed one.
    /// A rejected picture is handed back for recycling.
    pub fn admit(&mut self, picture: Picture) -> Result<(), Picture> {
        match self.last_displayed {
            Some(last) if picture.decode_id <= last => Err(picture),
            _ => {
                self.pending.push_back(picture);
                Ok(())
            }
        }
    }

    pub fn picture_ready(&mut self, result: PictureResult) -> Result<(), StreamError> {
        let picture = match result {
            Ok(picture) => picture,
            Err(PictureError::Aborted) => {
                debug!("picture wait aborted");
                return Ok(());
            }
            Err(PictureError::Failed(reason)) => {
                warn!("picture wait failed: {reason}");
                self.arm();
                return Ok(());
            }
        };

        if let Err(stale) = self.admit(picture) {
            trace!(decode_id = stale.decode_id, "dropping out-of-order picture");
            self.decoder.recycle_picture(stale);
        }
        self.arm();

        if !self.painting && !self.pending.is_empty() {
            self.paint()?;
        }
        Ok(())
    }

    fn paint(&mut self) -> Result<(), StreamError> {
        self.painting = true;
        self.drop_stale();

        let Some(front) = self.pending.front() else {
            self.painting = false;
            return Ok(());
        };

        if front.is_bogus() {
            if let Some(bogus) = self.pending.pop_front() {
                self.decoder.recycle_picture(bogus);
            }
            self.painting = false;
            return Ok(());
        }

        self.last_displayed = Some(front.decode_id);
        let done = SwapCallback::swap_complete(self.events.clone());
        if let Err(e) = self.renderer.draw(front, done) {
            self.painting = false;
            return Err(e);
        }
        Ok(())
    }

    /// Keep only the freshest pending picture.
    fn drop_stale(&mut self) {
        let Some(freshest) = self
            .pending
            .iter()
            .enumerate()
            .max_by_key(|(_, p)| p.decode_id)
            .map(|(i, _)| i)
        else {
            return;
        };
        let keep = self.pending.remove(freshest);
        for stale in self.pending.drain(..) {
            trace!(decode_id = stale.decode_id, "skipping late picture");
            self.decoder.recycle_picture(stale);
        }
        self.pending.extend(keep);
    }

    pub fn swap_complete(&mut self) -> Result<(), StreamError> {
        if !self.painting {
            debug!("swap completion with no paint in flight");
            return Ok(());
        }
        self.painting = false;
        if let Some(shown) = self.pending.pop_front() {
            self.decoder.recycle_picture(shown);
        }
        if !self.pending.is_empty() {
            self.paint()?;
        }
        Ok(())
    }

    /// Return every held picture and release the shader programs.
    pub fn teardown(&mut self) {
        for picture in self.pending.drain(..) {
            self.decoder.recycle_picture(picture);
        }
        self.painting = false;
        self.renderer.release();
    }
}
