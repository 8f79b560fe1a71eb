//! Streams and the attach/detach state machine.
//!
//! A [`Stream`] is a logical producer or consumer of PCM data. Routing binds
//! it to one stream route at a time:
//!
//! ```text
//! Detached ──attach──▶ Attaching ──ports activated──▶ Attached
//!     ▲                    │ failure                      │
//!     └────────────────────┘                          detach
//!     ▲                                                   │
//!     └─────────────── Detaching ◀────────────────────────┘
//! ```
//!
//! While attached the stream owns the route's device and a conversion
//! pipeline between its own spec and the route's native spec. The data path
//! (`write`/`read`) holds the attachment's read lock plus the io mutex, so a
//! detach (write lock) waits for an in-flight transfer to finish and never
//! tears the device down under it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use audiohal_core::{
    BufferProvider, ConversionError, ConversionPipeline, ResamplerPrimitive, SampleSpec,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::Direction;
use crate::device::{AudioDevice, DeviceParams};
use crate::error::{DeviceError, Result, RouteError};
use crate::route::RouteId;

/// Id of a stream registered with the route manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub(crate) u32);

impl StreamId {
    /// Returns the raw id.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

/// What a stream asks of its route.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamConfig {
    /// Spec the client produces or consumes.
    pub spec: SampleSpec,
    /// Stream flags (0 selects the primary route).
    pub flags: u32,
    /// Use-case mask.
    pub use_case: u32,
    /// Requested pre-processing effects.
    pub effects: u32,
}

/// Attachment lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AttachState {
    /// No route.
    #[default]
    Detached,
    /// Device opened and pipeline built, ports not yet activated.
    Attaching,
    /// Routed; the data path is live.
    Attached,
    /// Tearing down.
    Detaching,
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttachState::Detached => "detached",
            AttachState::Attaching => "attaching",
            AttachState::Attached => "attached",
            AttachState::Detaching => "detaching",
        })
    }
}

/// Device and pipeline used by the data path.
struct Io {
    device: Box<dyn AudioDevice>,
    pipeline: ConversionPipeline,
    scratch: Vec<u8>,
}

#[derive(Default)]
struct Attachment {
    state: AttachState,
    route: Option<RouteId>,
    route_spec: Option<SampleSpec>,
    period_size: usize,
    period_count: usize,
    io: Option<Mutex<Io>>,
}

/// Failed attach: the error plus the device, handed back to the route.
pub(crate) struct AttachFailure {
    pub(crate) error: RouteError,
    pub(crate) device: Box<dyn AudioDevice>,
}

/// A logical input or output stream.
pub struct Stream {
    id: StreamId,
    direction: Direction,
    config: StreamConfig,
    started: AtomicBool,
    attachment: RwLock<Attachment>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("config", &self.config)
            .field("started", &self.is_started())
            .field("state", &self.state())
            .finish()
    }
}

impl Stream {
    pub(crate) fn new(id: StreamId, direction: Direction, config: StreamConfig) -> Self {
        Self {
            id,
            direction,
            config,
            started: AtomicBool::new(false),
            attachment: RwLock::new(Attachment::default()),
        }
    }

    /// Stream id.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Stream direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Requested spec, flags, use case and effects.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Spec the client side uses.
    pub fn spec(&self) -> &SampleSpec {
        &self.config.spec
    }

    /// Whether the stream wants a route.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::Release);
    }

    /// Current attachment state.
    pub fn state(&self) -> AttachState {
        self.attachment.read().state
    }

    /// Whether the stream is attached to a route.
    pub fn is_routed(&self) -> bool {
        self.state() == AttachState::Attached
    }

    /// Route the stream is attached to.
    pub fn route(&self) -> Option<RouteId> {
        self.attachment.read().route
    }

    /// Native spec of the attached route.
    pub fn route_spec(&self) -> Option<SampleSpec> {
        self.attachment.read().route_spec.clone()
    }

    /// Conversion stages of the active pipeline, described.
    pub fn pipeline_stages(&self) -> Vec<String> {
        let att = self.attachment.read();
        att.io.as_ref().map_or_else(Vec::new, |io| {
            io.lock().pipeline.stages().iter().map(|s| s.describe()).collect()
        })
    }

    /// Buffer size in bytes on the client side, derived from the route's
    /// period size. Zero when not routed.
    pub fn buffer_size_bytes(&self) -> usize {
        let att = self.attachment.read();
        let Some(route_spec) = att.route_spec.as_ref() else {
            return 0;
        };
        let frames =
            audiohal_core::convert_src_to_dst_frames(att.period_size, route_spec, self.spec());
        self.spec().frames_to_bytes(frames)
    }

    /// Latency of the attached route in microseconds, zero when not routed.
    pub fn latency_us(&self) -> u64 {
        let att = self.attachment.read();
        att.route_spec
            .as_ref()
            .map_or(0, |s| s.frames_to_usec(att.period_size * att.period_count))
    }

    /// Period of the attached route in microseconds, zero when not routed.
    pub fn period_us(&self) -> u64 {
        let att = self.attachment.read();
        att.route_spec
            .as_ref()
            .map_or(0, |s| s.frames_to_usec(att.period_size))
    }

    // --- state machine ---

    /// Opens `device` and builds the pipeline, leaving the stream in
    /// `Attaching`. On failure the device is closed and handed back and the
    /// stream returns to `Detached`.
    pub(crate) fn attach(
        &self,
        route: RouteId,
        mut device: Box<dyn AudioDevice>,
        params: &DeviceParams,
        silence_prolog_ms: u32,
        primitive: Arc<dyn ResamplerPrimitive>,
    ) -> std::result::Result<(), AttachFailure> {
        let mut att = self.attachment.write();
        if att.state != AttachState::Detached {
            let error = RouteError::InvalidTransition {
                stream: self.id.0,
                action: "attach",
                state: att.state,
            };
            return Err(AttachFailure { error, device });
        }
        if params.direction != self.direction {
            let error = RouteError::DirectionMismatch {
                stream: self.direction,
                route: params.direction,
            };
            return Err(AttachFailure { error, device });
        }
        att.state = AttachState::Attaching;
        debug!("stream {}: attaching to {route}", self.id);

        if let Err(e) = device.open(params) {
            att.state = AttachState::Detached;
            return Err(AttachFailure {
                error: e.into(),
                device,
            });
        }

        let mut pipeline = ConversionPipeline::with_primitive(primitive);
        let configured = match self.direction {
            Direction::Output => pipeline.configure(self.spec(), &params.spec),
            Direction::Input => pipeline.configure(&params.spec, self.spec()),
        };
        let primed = configured.map_err(RouteError::from).and_then(|()| {
            if self.direction.is_output() && silence_prolog_ms > 0 {
                write_silence(device.as_mut(), &params.spec, silence_prolog_ms)
            } else {
                Ok(())
            }
        });
        if let Err(error) = primed {
            close_quietly(device.as_mut(), self.id);
            att.state = AttachState::Detached;
            return Err(AttachFailure { error, device });
        }

        att.route = Some(route);
        att.route_spec = Some(params.spec.clone());
        att.period_size = params.period_size;
        att.period_count = params.period_count;
        att.io = Some(Mutex::new(Io {
            device,
            pipeline,
            scratch: Vec::new(),
        }));
        Ok(())
    }

    /// Completes an attach once the route's ports are active.
    pub(crate) fn complete_attach(&self) {
        let mut att = self.attachment.write();
        if att.state == AttachState::Attaching {
            att.state = AttachState::Attached;
            debug!("stream {}: attached", self.id);
        }
    }

    /// Tears the attachment down and returns the device, closed.
    ///
    /// Waits for an in-flight `read`/`write` to complete. A close error is
    /// logged and does not fail the detach.
    pub(crate) fn detach(&self) -> Result<Box<dyn AudioDevice>> {
        let mut att = self.attachment.write();
        if !matches!(att.state, AttachState::Attached | AttachState::Attaching) {
            return Err(RouteError::InvalidTransition {
                stream: self.id.0,
                action: "detach",
                state: att.state,
            });
        }
        att.state = AttachState::Detaching;
        let route = att.route.take();
        att.route_spec = None;
        let io = att.io.take();
        att.state = AttachState::Detached;

        let Some(io) = io else {
            return Err(RouteError::NotRouted(self.id.0));
        };
        let Io { mut device, .. } = io.into_inner();
        close_quietly(device.as_mut(), self.id);
        if let Some(route) = route {
            debug!("stream {}: detached from {route}", self.id);
        }
        Ok(device)
    }

    // --- data path ---

    /// Converts `data` (client spec) and writes it to the route device.
    ///
    /// Returns the number of client bytes consumed. Fails with
    /// [`RouteError::NotRouted`] when the stream has no route, and with
    /// [`DeviceError::Io`] when the device stops accepting data before the
    /// converted frames are all written.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if self.direction != Direction::Output {
            return Err(RouteError::DirectionMismatch {
                stream: self.direction,
                route: Direction::Output,
            });
        }
        let att = self.attachment.read();
        let io = match (&att.io, att.state) {
            (Some(io), AttachState::Attached) => io,
            _ => return Err(RouteError::NotRouted(self.id.0)),
        };
        let mut io = io.lock();
        let Io {
            device,
            pipeline,
            scratch,
        } = &mut *io;

        let frames = self.spec().bytes_to_frames(data.len());
        let out_bytes = pipeline
            .dst_spec()
            .frames_to_bytes(pipeline.max_output_frames(frames));
        if scratch.len() < out_bytes {
            scratch.resize(out_bytes, 0);
        }
        let produced = pipeline.convert_into(data, frames, scratch)?;
        let produced_bytes = pipeline.dst_spec().frames_to_bytes(produced);
        write_all(device.as_mut(), &scratch[..produced_bytes])?;
        Ok(self.spec().frames_to_bytes(frames))
    }

    /// Reads from the route device and converts into `data` (client spec).
    ///
    /// Without a route the buffer is filled with silence and its full length
    /// is reported.
    pub fn read(&self, data: &mut [u8]) -> Result<usize> {
        if self.direction != Direction::Input {
            return Err(RouteError::DirectionMismatch {
                stream: self.direction,
                route: Direction::Input,
            });
        }
        let att = self.attachment.read();
        let io = match (&att.io, att.state) {
            (Some(io), AttachState::Attached) => io,
            _ => {
                data.fill(0);
                return Ok(data.len());
            }
        };
        let mut io = io.lock();
        let Io {
            device, pipeline, ..
        } = &mut *io;

        let frames = self.spec().bytes_to_frames(data.len());
        let frame_size = pipeline.src_spec().frame_size();
        let mut reader = DeviceReader {
            device: device.as_mut(),
            frame_size,
        };
        pipeline.pull_converted(data, frames, &mut reader)?;
        Ok(self.spec().frames_to_bytes(frames))
    }
}

/// Feeds capture data from a device into the pipeline.
struct DeviceReader<'a> {
    device: &'a mut dyn AudioDevice,
    frame_size: usize,
}

impl BufferProvider for DeviceReader<'_> {
    fn fill(&mut self, buf: &mut [u8], frames: usize) -> audiohal_core::Result<usize> {
        let bytes = (frames * self.frame_size).min(buf.len());
        let read = self
            .device
            .read(&mut buf[..bytes])
            .map_err(|e| ConversionError::Provider(e.to_string()))?;
        Ok(read / self.frame_size.max(1))
    }
}

fn write_silence(device: &mut dyn AudioDevice, spec: &SampleSpec, ms: u32) -> Result<()> {
    let frames = spec.usec_to_frames(u64::from(ms) * 1000);
    let silence = vec![0u8; spec.frames_to_bytes(frames)];
    write_all(device, &silence)?;
    Ok(())
}

/// Writes `data` through as many device writes as it takes.
fn write_all(device: &mut dyn AudioDevice, mut data: &[u8]) -> std::result::Result<(), DeviceError> {
    let total = data.len();
    while !data.is_empty() {
        let written = device.write(data)?;
        if written == 0 {
            return Err(DeviceError::Io(format!(
                "short write: {} of {total} bytes accepted",
                total - data.len()
            )));
        }
        data = &data[written.min(data.len())..];
    }
    Ok(())
}

fn close_quietly(device: &mut dyn AudioDevice, stream: StreamId) {
    if let Err(e) = device.close() {
        warn!("stream {stream}: device close failed: {e}");
    }
}
