//! C ABI for host audio frameworks.
//!
//! The host loads the library, reads [`AUDIO_EFFECT_LIBRARY_INFO_SYM`] (or
//! calls the `Effect*` exports directly) and drives each instance through
//! the [`EffectInterface`] table stored at the start of every handle.
//! Render and command calls on one handle are serialized by the host.
//!
//! Status codes are negative errno values, 0 on success.

use std::ffi::{c_char, c_void};
use std::mem::size_of;
use std::path::PathBuf;
use std::ptr;
use std::slice;
use std::sync::Arc;

use audioshift_dsp::{f32_to_pcm16, pcm16_to_f32, ratio, MAX_BLOCK_FRAMES, MAX_CHANNELS};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigStore, FileStore, MemoryStore};
use crate::control::{ControlLoop, TelemetryPublisher, DEFAULT_POLL_INTERVAL, DEFAULT_PUBLISH_INTERVAL};
use crate::descriptor::{EffectDescriptor, EffectUuid, DESCRIPTOR, IMPL_UUID};
use crate::error::EffectError;
use crate::lifecycle::{CommandReply, Effect, EffectCommand, EffectState, StreamConfig};
use crate::mode::{AudioMode, ModeMonitor};

// Status codes
pub const OK: i32 = 0;
/// Call not valid in the instance's current state (-EPERM)
pub const INVALID_STATE: i32 = -1;
pub const NAME_NOT_FOUND: i32 = -2;
pub const NO_MEMORY: i32 = -12;
pub const BAD_VALUE: i32 = -22;
pub const INVALID_OPERATION: i32 = -38;

// Standard commands
pub const EFFECT_CMD_INIT: u32 = 0;
pub const EFFECT_CMD_SET_CONFIG: u32 = 1;
pub const EFFECT_CMD_RESET: u32 = 2;
pub const EFFECT_CMD_ENABLE: u32 = 3;
pub const EFFECT_CMD_DISABLE: u32 = 4;
pub const EFFECT_CMD_SET_PARAM: u32 = 5;
pub const EFFECT_CMD_GET_PARAM: u32 = 8;
pub const EFFECT_CMD_SET_AUDIO_MODE: u32 = 11;
pub const EFFECT_CMD_GET_CONFIG: u32 = 14;
/// Not in the platform's numbered set; takes the first free code after it
pub const EFFECT_CMD_GET_DESCRIPTOR: u32 = 22;

// Proprietary commands
pub const CMD_SET_ENABLED: u32 = 0x10000;
pub const CMD_SET_PITCH_RATIO: u32 = 0x10001;
pub const CMD_GET_LATENCY_MS: u32 = 0x10002;
pub const CMD_GET_CPU_USAGE: u32 = 0x10003;
pub const CMD_RESET_STATS: u32 = 0x10004;
pub const CMD_GET_FAULT_COUNT: u32 = 0x10005;

// Parameter ids for SET_PARAM / GET_PARAM
pub const PARAM_ENABLED: i32 = 0;
/// Pitch offset in hundredths of a cent
pub const PARAM_PITCH_CENTS: i32 = 1;
/// Read-only algorithmic latency in whole milliseconds
pub const PARAM_LATENCY_MS: i32 = 2;

pub const AUDIO_FORMAT_PCM_16_BIT: u8 = 0x1;
pub const AUDIO_FORMAT_PCM_FLOAT: u8 = 0x5;
pub const AUDIO_CHANNEL_OUT_MONO: u32 = 0x1;
pub const AUDIO_CHANNEL_OUT_STEREO: u32 = 0x3;

/// 'AELT'
pub const AUDIO_EFFECT_LIBRARY_TAG: u32 = 0x4145_4C54;
pub const EFFECT_LIBRARY_API_VERSION: u32 = 0x0003_0000;

/// Environment variable naming the config file used by ABI instances
pub const CONFIG_PATH_ENV: &str = "AUDIOSHIFT_CONFIG";

/// Audio block exchanged with the host
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AudioBuffer {
    pub frame_count: usize,
    pub raw: *mut c_void,
}

pub type BufferFunction = Option<unsafe extern "C" fn(cookie: *mut c_void, buffer: *mut AudioBuffer) -> i32>;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BufferProvider {
    pub get_buffer: BufferFunction,
    pub release_buffer: BufferFunction,
    pub cookie: *mut c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BufferConfig {
    pub buffer: AudioBuffer,
    pub sampling_rate: u32,
    /// Channel mask
    pub channels: u32,
    pub buffer_provider: BufferProvider,
    pub format: u8,
    pub access_mode: u8,
    pub mask: u16,
}

impl BufferConfig {
    fn new(sampling_rate: u32, channels: u32, format: u8) -> Self {
        Self {
            buffer: AudioBuffer {
                frame_count: 0,
                raw: ptr::null_mut(),
            },
            sampling_rate,
            channels,
            buffer_provider: BufferProvider {
                get_buffer: None,
                release_buffer: None,
                cookie: ptr::null_mut(),
            },
            format,
            access_mode: 0,
            mask: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EffectConfig {
    pub input_cfg: BufferConfig,
    pub output_cfg: BufferConfig,
}

impl Default for EffectConfig {
    /// 48 kHz stereo 16-bit, the host default
    fn default() -> Self {
        let cfg = BufferConfig::new(48_000, AUDIO_CHANNEL_OUT_STEREO, AUDIO_FORMAT_PCM_16_BIT);
        Self {
            input_cfg: cfg,
            output_cfg: cfg,
        }
    }
}

/// Header of a SET_PARAM / GET_PARAM payload. Parameter bytes follow,
/// padded to 4, then value bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectParam {
    pub status: i32,
    pub psize: u32,
    pub vsize: u32,
}

/// Per-instance function table
#[repr(C)]
pub struct EffectInterface {
    pub process: unsafe extern "C" fn(EffectHandle, *mut AudioBuffer, *mut AudioBuffer) -> i32,
    pub command: unsafe extern "C" fn(EffectHandle, u32, u32, *mut c_void, *mut u32, *mut c_void) -> i32,
    pub get_descriptor: unsafe extern "C" fn(EffectHandle, *mut EffectDescriptor) -> i32,
    pub process_reverse: unsafe extern "C" fn(EffectHandle, *mut AudioBuffer, *mut AudioBuffer) -> i32,
}

/// Opaque instance handle: points at the interface pointer heading the
/// instance context
pub type EffectHandle = *mut *const EffectInterface;

/// Library entry table looked up by symbol name
#[repr(C)]
pub struct AudioEffectLibrary {
    pub tag: u32,
    pub version: u32,
    pub name: *const c_char,
    pub implementor: *const c_char,
    pub create_effect: unsafe extern "C" fn(*const EffectUuid, i32, i32, *mut EffectHandle) -> i32,
    pub release_effect: unsafe extern "C" fn(EffectHandle) -> i32,
    pub get_descriptor: unsafe extern "C" fn(*const EffectUuid, *mut EffectDescriptor) -> i32,
}

// Only points at static data
unsafe impl Sync for AudioEffectLibrary {}

#[no_mangle]
pub static AUDIO_EFFECT_LIBRARY_INFO_SYM: AudioEffectLibrary = AudioEffectLibrary {
    tag: AUDIO_EFFECT_LIBRARY_TAG,
    version: EFFECT_LIBRARY_API_VERSION,
    name: b"AudioShift 432Hz Library\0".as_ptr() as *const c_char,
    implementor: b"AudioShift Project\0".as_ptr() as *const c_char,
    create_effect: EffectCreate,
    release_effect: EffectRelease,
    get_descriptor: EffectGetDescriptor,
};

static INTERFACE: EffectInterface = EffectInterface {
    process: effect_process,
    command: effect_command,
    get_descriptor: effect_get_descriptor,
    process_reverse: effect_process_reverse,
};

/// Addresses of every live instance. Stale or foreign handles are
/// rejected instead of dereferenced.
static LIVE_HANDLES: RwLock<Vec<usize>> = parking_lot::const_rwlock(Vec::new());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleFormat {
    Pcm16,
    Float,
}

impl SampleFormat {
    fn from_raw(format: u8) -> Option<Self> {
        match format {
            AUDIO_FORMAT_PCM_16_BIT => Some(Self::Pcm16),
            AUDIO_FORMAT_PCM_FLOAT => Some(Self::Float),
            _ => None,
        }
    }
}

/// Instance state behind a handle. `itfe` must stay the first field.
#[repr(C)]
struct EffectContext {
    itfe: *const EffectInterface,
    effect: Effect,
    config: EffectConfig,
    format: SampleFormat,
    channels: usize,
    scratch_in: Vec<f32>,
    scratch_out: Vec<f32>,
    control: Option<ControlLoop>,
}

impl EffectContext {
    fn new() -> Result<Self, EffectError> {
        let store = open_store();
        let mut effect = Effect::create(store.clone())?;
        let config = EffectConfig::default();
        let channels = channel_count(config.input_cfg.channels);

        if let Err(e) = effect.initialize(stream_config(&config)) {
            warn!("Default configuration rejected: {}", e);
        }

        let controller = effect.controller();
        let monitor = ModeMonitor::new(controller.mode_signal(), controller.selector(), DEFAULT_POLL_INTERVAL);
        let publisher = TelemetryPublisher::new(controller, store, DEFAULT_PUBLISH_INTERVAL);
        let control = match ControlLoop::spawn(monitor, publisher, DEFAULT_POLL_INTERVAL) {
            Ok(control) => Some(control),
            Err(e) => {
                warn!("Control loop unavailable, mode changes will not switch profiles: {}", e);
                None
            }
        };

        Ok(Self {
            itfe: &INTERFACE,
            effect,
            config,
            format: SampleFormat::Pcm16,
            channels,
            scratch_in: vec![0.0; MAX_BLOCK_FRAMES * channels],
            scratch_out: vec![0.0; MAX_BLOCK_FRAMES * channels],
            control,
        })
    }

    fn set_config(&mut self, config: EffectConfig) -> i32 {
        let input = config.input_cfg;
        let output = config.output_cfg;
        let channels = channel_count(input.channels);
        if input.sampling_rate != output.sampling_rate
            || input.format != output.format
            || channels != channel_count(output.channels)
        {
            warn!("Input and output configurations differ");
            return BAD_VALUE;
        }
        let Some(format) = SampleFormat::from_raw(input.format) else {
            warn!("Unsupported sample format {:#x}", input.format);
            return BAD_VALUE;
        };
        if channels == 0 || channels > MAX_CHANNELS {
            warn!("Unsupported channel mask {:#x}", input.channels);
            return BAD_VALUE;
        }

        let was_running = matches!(self.effect.state(), EffectState::Active | EffectState::Bypassed);
        let status = match self.effect.initialize(stream_config(&config)) {
            Ok(()) => OK,
            Err(e) => {
                warn!("SET_CONFIG: {}", e);
                e.errno()
            }
        };
        if self.effect.state() == EffectState::Initialized {
            self.config = config;
            self.format = format;
            if channels != self.channels {
                self.channels = channels;
                self.scratch_in = vec![0.0; MAX_BLOCK_FRAMES * channels];
                self.scratch_out = vec![0.0; MAX_BLOCK_FRAMES * channels];
            }
            if was_running {
                let _ = self.effect.activate();
            }
        }
        status
    }

    /// Convert, process and convert back. The input is copied out before
    /// the output is written, so in-place buffers are fine.
    ///
    /// # Safety
    /// `src` and `dst` must each hold `samples` samples of the configured
    /// format, and `samples` must fit the scratch buffers.
    unsafe fn render(&mut self, src: *const c_void, dst: *mut c_void, samples: usize) -> i32 {
        let input = &mut self.scratch_in[..samples];
        let output = &mut self.scratch_out[..samples];
        match self.format {
            SampleFormat::Pcm16 => pcm16_to_f32(unsafe { slice::from_raw_parts(src as *const i16, samples) }, input),
            SampleFormat::Float => input.copy_from_slice(unsafe { slice::from_raw_parts(src as *const f32, samples) }),
        }

        let result = self.effect.process(input, output);
        let rendered: &[f32] = if result.is_ok() { output } else { input };
        match self.format {
            SampleFormat::Pcm16 => f32_to_pcm16(rendered, unsafe { slice::from_raw_parts_mut(dst as *mut i16, samples) }),
            SampleFormat::Float => unsafe { slice::from_raw_parts_mut(dst as *mut f32, samples) }.copy_from_slice(rendered),
        }

        match result {
            Ok(_) => OK,
            Err(e) => e.errno(),
        }
    }

    /// Rebuild the pipeline for the current configuration. A running
    /// effect keeps running.
    fn reinitialize(&mut self) -> i32 {
        let was_running = matches!(self.effect.state(), EffectState::Active | EffectState::Bypassed);
        let status = match self.effect.initialize(stream_config(&self.config)) {
            Ok(()) => OK,
            Err(e) => {
                warn!("INIT: {}", e);
                e.errno()
            }
        };
        if was_running && self.effect.state() == EffectState::Initialized {
            let _ = self.effect.activate();
        }
        status
    }

    fn ensure_initialized(&mut self) -> i32 {
        if self.effect.state() != EffectState::Created {
            return OK;
        }
        match self.effect.initialize(stream_config(&self.config)) {
            Ok(()) => OK,
            Err(e) => e.errno(),
        }
    }

    fn run(&mut self, command: EffectCommand) -> Result<CommandReply, i32> {
        self.effect.command(command).map_err(|e| {
            warn!("{:?} failed: {}", command, e);
            e.errno()
        })
    }

    fn latency_ms(&self) -> i32 {
        let rate = self.config.input_cfg.sampling_rate.max(1) as u64;
        let frames = self.effect.latency_frames().unwrap_or(0) as u64;
        (frames * 1000).div_ceil(rate) as i32
    }

    fn set_param(&mut self, param: i32, value: i32) -> i32 {
        match param {
            PARAM_ENABLED => {
                let command = if value != 0 {
                    EffectCommand::Enable
                } else {
                    EffectCommand::Disable
                };
                self.run(command).map_or_else(|e| e, |_| OK)
            }
            PARAM_PITCH_CENTS => match ratio::ratio_from_cents(value as f64 / 100.0) {
                Ok(r) => self.run(EffectCommand::SetPitchRatio(r)).map_or_else(|e| e, |_| OK),
                Err(_) => BAD_VALUE,
            },
            _ => BAD_VALUE,
        }
    }

    fn get_param(&self, param: i32) -> Result<i32, i32> {
        match param {
            PARAM_ENABLED => Ok(self.effect.controller().is_enabled() as i32),
            PARAM_PITCH_CENTS => ratio::cents_from_ratio(self.effect.pitch_ratio())
                .map(|cents| (cents * 100.0).round() as i32)
                .map_err(|_| BAD_VALUE),
            PARAM_LATENCY_MS => Ok(self.latency_ms()),
            _ => Err(BAD_VALUE),
        }
    }
}

impl Drop for EffectContext {
    fn drop(&mut self) {
        // stop publishing before the effect tears down its buffers
        if let Some(mut control) = self.control.take() {
            control.stop();
        }
    }
}

fn open_store() -> Arc<dyn ConfigStore> {
    let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from).or_else(|| {
        let path = FileStore::default_path();
        path.exists().then_some(path)
    });
    let Some(path) = path else {
        return Arc::new(MemoryStore::new());
    };
    match FileStore::open(&path) {
        Ok(store) => {
            debug!("Using config file {}", path.display());
            Arc::new(store)
        }
        Err(e) => {
            warn!("{}, falling back to in-memory config", e);
            Arc::new(MemoryStore::new())
        }
    }
}

fn channel_count(mask: u32) -> usize {
    mask.count_ones() as usize
}

fn stream_config(config: &EffectConfig) -> StreamConfig {
    StreamConfig {
        sample_rate: config.input_cfg.sampling_rate,
        channels: channel_count(config.input_cfg.channels),
        max_block_frames: MAX_BLOCK_FRAMES,
    }
}

fn is_live(handle: EffectHandle) -> bool {
    LIVE_HANDLES.read().contains(&(handle as usize))
}

/// Render-path liveness check. Never blocks: if the registry is being
/// written the handle is trusted, the host serializes release anyway.
fn is_live_nonblocking(handle: EffectHandle) -> bool {
    LIVE_HANDLES
        .try_read()
        .map_or(true, |live| live.contains(&(handle as usize)))
}

/// # Safety
/// `handle` must be live and not aliased for the returned lifetime.
unsafe fn instance<'a>(handle: EffectHandle) -> &'a mut EffectContext {
    unsafe { &mut *(handle as *mut EffectContext) }
}

/// Read a `T` command payload
///
/// # Safety
/// `data` must point at `size` readable bytes.
unsafe fn read_cmd<T: Copy>(size: u32, data: *const c_void) -> Option<T> {
    if data.is_null() || (size as usize) < size_of::<T>() {
        return None;
    }
    Some(unsafe { ptr::read_unaligned(data as *const T) })
}

/// Write a `T` reply and its size
///
/// # Safety
/// `reply_size` must point at the capacity of `reply`.
unsafe fn write_reply<T: Copy>(reply_size: *mut u32, reply: *mut c_void, value: T) -> i32 {
    if reply_size.is_null() || reply.is_null() || (unsafe { *reply_size } as usize) < size_of::<T>() {
        return BAD_VALUE;
    }
    unsafe {
        ptr::write_unaligned(reply as *mut T, value);
        *reply_size = size_of::<T>() as u32;
    }
    OK
}

/// Report a status through the int reply when the host gave one,
/// otherwise as the return value
///
/// # Safety
/// Same as [`write_reply`].
unsafe fn reply_status(reply_size: *mut u32, reply: *mut c_void, status: i32) -> i32 {
    if reply.is_null() || reply_size.is_null() {
        return status;
    }
    unsafe { write_reply(reply_size, reply, status) }
}

const fn padded(size: usize) -> usize {
    (size + 3) & !3
}

/// Create an instance.
///
/// # Safety
/// `uuid` must be null or point at a valid UUID; `handle` must be null or
/// writable.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn EffectCreate(
    uuid: *const EffectUuid,
    session_id: i32,
    io_id: i32,
    handle: *mut EffectHandle,
) -> i32 {
    if uuid.is_null() || handle.is_null() {
        return BAD_VALUE;
    }
    let uuid = unsafe { *uuid };
    if uuid != IMPL_UUID {
        warn!("EffectCreate: unknown uuid {}", uuid);
        return BAD_VALUE;
    }

    match EffectContext::new() {
        Ok(context) => {
            let raw = Box::into_raw(Box::new(context));
            LIVE_HANDLES.write().push(raw as usize);
            unsafe { *handle = raw as EffectHandle };
            info!("EffectCreate: session {} io {}", session_id, io_id);
            OK
        }
        Err(e) => {
            error!("EffectCreate failed: {}", e);
            NO_MEMORY
        }
    }
}

/// Destroy an instance. A second release of the same handle is rejected.
///
/// # Safety
/// `handle` must be null or a value returned by [`EffectCreate`].
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn EffectRelease(handle: EffectHandle) -> i32 {
    if handle.is_null() {
        return BAD_VALUE;
    }
    let removed = {
        let mut live = LIVE_HANDLES.write();
        match live.iter().position(|&h| h == handle as usize) {
            Some(index) => {
                live.swap_remove(index);
                true
            }
            None => false,
        }
    };
    if !removed {
        warn!("EffectRelease: handle is not live");
        return INVALID_STATE;
    }

    let mut context = unsafe { Box::from_raw(handle as *mut EffectContext) };
    if let Some(mut control) = context.control.take() {
        control.stop();
    }
    match context.effect.release() {
        Ok(()) => OK,
        Err(e) => e.errno(),
    }
}

/// Descriptor lookup by implementation UUID.
///
/// # Safety
/// Pointers must be null or valid.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn EffectGetDescriptor(uuid: *const EffectUuid, descriptor: *mut EffectDescriptor) -> i32 {
    if uuid.is_null() || descriptor.is_null() {
        return BAD_VALUE;
    }
    if unsafe { *uuid } != IMPL_UUID {
        return BAD_VALUE;
    }
    unsafe { *descriptor = DESCRIPTOR };
    OK
}

/// # Safety
/// `count` must be null or writable.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn EffectQueryNumberEffects(count: *mut u32) -> i32 {
    if count.is_null() {
        return BAD_VALUE;
    }
    unsafe { *count = 1 };
    OK
}

/// # Safety
/// `descriptor` must be null or writable.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn EffectQueryEffect(index: u32, descriptor: *mut EffectDescriptor) -> i32 {
    if descriptor.is_null() {
        return BAD_VALUE;
    }
    if index > 0 {
        return NAME_NOT_FOUND;
    }
    unsafe { *descriptor = DESCRIPTOR };
    OK
}

unsafe extern "C" fn effect_process(handle: EffectHandle, in_buffer: *mut AudioBuffer, out_buffer: *mut AudioBuffer) -> i32 {
    if handle.is_null() || !is_live_nonblocking(handle) {
        return INVALID_STATE;
    }
    if in_buffer.is_null() || out_buffer.is_null() {
        return BAD_VALUE;
    }
    let (input, output) = unsafe { (*in_buffer, *out_buffer) };
    if input.raw.is_null()
        || output.raw.is_null()
        || input.frame_count != output.frame_count
        || input.frame_count > MAX_BLOCK_FRAMES
    {
        return BAD_VALUE;
    }

    let context = unsafe { instance(handle) };
    let samples = input.frame_count * context.channels;
    unsafe { context.render(input.raw, output.raw, samples) }
}

unsafe extern "C" fn effect_command(
    handle: EffectHandle,
    code: u32,
    cmd_size: u32,
    cmd_data: *mut c_void,
    reply_size: *mut u32,
    reply_data: *mut c_void,
) -> i32 {
    if handle.is_null() || !is_live(handle) {
        return INVALID_STATE;
    }
    let context = unsafe { instance(handle) };

    match code {
        EFFECT_CMD_INIT => {
            let status = context.reinitialize();
            unsafe { reply_status(reply_size, reply_data, status) }
        }
        EFFECT_CMD_GET_DESCRIPTOR => unsafe { write_reply(reply_size, reply_data, DESCRIPTOR) },
        EFFECT_CMD_SET_CONFIG => {
            let Some(config) = (unsafe { read_cmd::<EffectConfig>(cmd_size, cmd_data) }) else {
                return BAD_VALUE;
            };
            let status = context.set_config(config);
            unsafe { reply_status(reply_size, reply_data, status) }
        }
        EFFECT_CMD_GET_CONFIG => unsafe { write_reply(reply_size, reply_data, context.config) },
        EFFECT_CMD_RESET => context.run(EffectCommand::Reset).map_or_else(|e| e, |_| OK),
        EFFECT_CMD_ENABLE => {
            let mut status = context.ensure_initialized();
            if status == OK {
                status = match context.effect.activate() {
                    Ok(()) => context.run(EffectCommand::Enable).map_or_else(|e| e, |_| OK),
                    Err(e) => e.errno(),
                };
            }
            unsafe { reply_status(reply_size, reply_data, status) }
        }
        EFFECT_CMD_DISABLE => {
            let status = context
                .run(EffectCommand::Disable)
                .and_then(|_| context.run(EffectCommand::Reset))
                .map_or_else(|e| e, |_| OK);
            unsafe { reply_status(reply_size, reply_data, status) }
        }
        EFFECT_CMD_SET_PARAM => {
            let header_len = size_of::<EffectParam>();
            let Some(header) = (unsafe { read_cmd::<EffectParam>(cmd_size, cmd_data) }) else {
                return BAD_VALUE;
            };
            let value_offset = header_len + padded(header.psize as usize);
            if header.psize as usize != size_of::<i32>()
                || header.vsize as usize != size_of::<i32>()
                || (cmd_size as usize) < value_offset + size_of::<i32>()
            {
                return unsafe { reply_status(reply_size, reply_data, BAD_VALUE) };
            }
            let base = cmd_data as *const u8;
            let (param, value) = unsafe {
                (
                    ptr::read_unaligned(base.add(header_len) as *const i32),
                    ptr::read_unaligned(base.add(value_offset) as *const i32),
                )
            };
            let status = context.set_param(param, value);
            unsafe { reply_status(reply_size, reply_data, status) }
        }
        EFFECT_CMD_GET_PARAM => {
            let header_len = size_of::<EffectParam>();
            let Some(mut header) = (unsafe { read_cmd::<EffectParam>(cmd_size, cmd_data) }) else {
                return BAD_VALUE;
            };
            let value_offset = header_len + padded(header.psize as usize);
            let reply_len = value_offset + size_of::<i32>();
            if header.psize as usize != size_of::<i32>()
                || (cmd_size as usize) < header_len + size_of::<i32>()
                || reply_size.is_null()
                || reply_data.is_null()
                || (unsafe { *reply_size } as usize) < reply_len
            {
                return BAD_VALUE;
            }
            let param = unsafe { ptr::read_unaligned((cmd_data as *const u8).add(header_len) as *const i32) };
            let out = reply_data as *mut u8;
            match context.get_param(param) {
                Ok(value) => {
                    header.status = OK;
                    header.vsize = size_of::<i32>() as u32;
                    unsafe {
                        ptr::write_unaligned(out.add(value_offset) as *mut i32, value);
                        *reply_size = reply_len as u32;
                    }
                }
                Err(status) => {
                    header.status = status;
                    header.vsize = 0;
                    unsafe { *reply_size = value_offset as u32 };
                }
            }
            unsafe {
                ptr::write_unaligned(out as *mut EffectParam, header);
                ptr::write_unaligned(out.add(header_len) as *mut i32, param);
            }
            OK
        }
        EFFECT_CMD_SET_AUDIO_MODE => {
            let Some(raw) = (unsafe { read_cmd::<i32>(cmd_size, cmd_data) }) else {
                return BAD_VALUE;
            };
            match AudioMode::from_raw(raw) {
                Some(mode) => context.run(EffectCommand::SetAudioMode(mode)).map_or_else(|e| e, |_| OK),
                None => {
                    debug!("Ignoring audio mode {}", raw);
                    OK
                }
            }
        }
        CMD_SET_ENABLED => {
            let Some(flag) = (unsafe { read_cmd::<i32>(cmd_size, cmd_data) }) else {
                return BAD_VALUE;
            };
            let status = context.set_param(PARAM_ENABLED, flag);
            unsafe { reply_status(reply_size, reply_data, status) }
        }
        CMD_SET_PITCH_RATIO => {
            let Some(requested) = (unsafe { read_cmd::<f32>(cmd_size, cmd_data) }) else {
                return BAD_VALUE;
            };
            let status = context
                .run(EffectCommand::SetPitchRatio(requested as f64))
                .map_or_else(|e| e, |_| OK);
            unsafe { reply_status(reply_size, reply_data, status) }
        }
        CMD_GET_LATENCY_MS => match context.run(EffectCommand::GetLatencyMs) {
            Ok(CommandReply::LatencyMs(ms)) => unsafe { write_reply(reply_size, reply_data, ms) },
            Ok(_) => BAD_VALUE,
            Err(e) => e,
        },
        CMD_GET_CPU_USAGE => match context.run(EffectCommand::GetCpuUsage) {
            Ok(CommandReply::CpuPercent(percent)) => unsafe { write_reply(reply_size, reply_data, percent) },
            Ok(_) => BAD_VALUE,
            Err(e) => e,
        },
        CMD_RESET_STATS => context.run(EffectCommand::ResetStats).map_or_else(|e| e, |_| OK),
        CMD_GET_FAULT_COUNT => match context.run(EffectCommand::GetFaultCount) {
            Ok(CommandReply::FaultCount(count)) => {
                let count = u32::try_from(count).unwrap_or(u32::MAX);
                unsafe { write_reply(reply_size, reply_data, count) }
            }
            Ok(_) => BAD_VALUE,
            Err(e) => e,
        },
        _ => {
            warn!("Unknown command {:#x}", code);
            BAD_VALUE
        }
    }
}

unsafe extern "C" fn effect_get_descriptor(handle: EffectHandle, descriptor: *mut EffectDescriptor) -> i32 {
    if handle.is_null() || !is_live(handle) {
        return INVALID_STATE;
    }
    if descriptor.is_null() {
        return BAD_VALUE;
    }
    unsafe { *descriptor = DESCRIPTOR };
    OK
}

unsafe extern "C" fn effect_process_reverse(_: EffectHandle, _: *mut AudioBuffer, _: *mut AudioBuffer) -> i32 {
    INVALID_OPERATION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TYPE_UUID;

    const FRAMES: usize = 480;

    fn create() -> EffectHandle {
        let mut handle: EffectHandle = ptr::null_mut();
        assert_eq!(unsafe { EffectCreate(&IMPL_UUID, 1, 2, &mut handle) }, OK);
        assert!(!handle.is_null());
        handle
    }

    fn itfe(handle: EffectHandle) -> &'static EffectInterface {
        unsafe { &**handle }
    }

    fn command(handle: EffectHandle, code: u32, payload: &mut [u8]) -> (i32, i32) {
        let mut reply = 0i32;
        let mut reply_size = size_of::<i32>() as u32;
        let status = unsafe {
            (itfe(handle).command)(
                handle,
                code,
                payload.len() as u32,
                payload.as_mut_ptr() as *mut c_void,
                &mut reply_size,
                &mut reply as *mut i32 as *mut c_void,
            )
        };
        (status, reply)
    }

    fn process_pcm16(handle: EffectHandle, block: &mut [i16]) -> i32 {
        let mut buffer = AudioBuffer {
            frame_count: block.len() / 2,
            raw: block.as_mut_ptr() as *mut c_void,
        };
        unsafe { (itfe(handle).process)(handle, &mut buffer, &mut buffer) }
    }

    fn get_param(handle: EffectHandle, param: i32) -> (i32, i32) {
        let mut cmd = [0u8; 16];
        let header = EffectParam {
            status: 0,
            psize: 4,
            vsize: 4,
        };
        unsafe {
            ptr::write_unaligned(cmd.as_mut_ptr() as *mut EffectParam, header);
            ptr::write_unaligned(cmd.as_mut_ptr().add(12) as *mut i32, param);
        }
        let mut reply = [0u8; 20];
        let mut reply_size = reply.len() as u32;
        let status = unsafe {
            (itfe(handle).command)(
                handle,
                EFFECT_CMD_GET_PARAM,
                cmd.len() as u32,
                cmd.as_mut_ptr() as *mut c_void,
                &mut reply_size,
                reply.as_mut_ptr() as *mut c_void,
            )
        };
        assert_eq!(status, OK);
        let header = unsafe { ptr::read_unaligned(reply.as_ptr() as *const EffectParam) };
        let value = unsafe { ptr::read_unaligned(reply.as_ptr().add(16) as *const i32) };
        (header.status, value)
    }

    #[test]
    fn test_create_rejects_unknown_uuid() {
        let mut handle: EffectHandle = ptr::null_mut();
        assert_eq!(unsafe { EffectCreate(&TYPE_UUID, 0, 0, &mut handle) }, BAD_VALUE);
        assert!(handle.is_null());
        assert_eq!(unsafe { EffectCreate(ptr::null(), 0, 0, &mut handle) }, BAD_VALUE);
    }

    #[test]
    fn test_library_symbol() {
        assert_eq!(AUDIO_EFFECT_LIBRARY_INFO_SYM.tag, AUDIO_EFFECT_LIBRARY_TAG);
        assert_eq!(AUDIO_EFFECT_LIBRARY_INFO_SYM.version, EFFECT_LIBRARY_API_VERSION);

        let mut count = 0;
        assert_eq!(unsafe { EffectQueryNumberEffects(&mut count) }, OK);
        assert_eq!(count, 1);

        let mut descriptor = DESCRIPTOR;
        descriptor.cpu_load = 0;
        assert_eq!(unsafe { EffectQueryEffect(0, &mut descriptor) }, OK);
        assert_eq!(descriptor.cpu_load, DESCRIPTOR.cpu_load);
        assert_eq!(unsafe { EffectQueryEffect(1, &mut descriptor) }, NAME_NOT_FOUND);
        assert_eq!(unsafe { EffectGetDescriptor(&TYPE_UUID, &mut descriptor) }, BAD_VALUE);
        assert_eq!(unsafe { EffectGetDescriptor(&IMPL_UUID, &mut descriptor) }, OK);
        assert_eq!(descriptor.uuid, IMPL_UUID);
    }

    #[test]
    fn test_process_before_enable_is_invalid_state() {
        let handle = create();
        let mut block = vec![1000i16; FRAMES * 2];
        let before = block.clone();
        assert_eq!(process_pcm16(handle, &mut block), INVALID_STATE);
        assert_eq!(block, before);
        assert_eq!(unsafe { EffectRelease(handle) }, OK);
    }

    #[test]
    fn test_full_session() {
        let handle = create();
        assert_eq!(command(handle, EFFECT_CMD_INIT, &mut []), (OK, OK));

        let mut config = EffectConfig::default().input_cfg;
        config.sampling_rate = 48_000;
        let cfg = EffectConfig {
            input_cfg: config,
            output_cfg: config,
        };
        let mut payload = vec![0u8; size_of::<EffectConfig>()];
        unsafe { ptr::write_unaligned(payload.as_mut_ptr() as *mut EffectConfig, cfg) };
        assert_eq!(command(handle, EFFECT_CMD_SET_CONFIG, &mut payload), (OK, OK));
        assert_eq!(command(handle, EFFECT_CMD_ENABLE, &mut []), (OK, OK));

        let mut shifted = false;
        for i in 0..200 {
            let mut block: Vec<i16> = (0..FRAMES * 2)
                .map(|n| {
                    let t = (i * FRAMES + n / 2) as f32 / 48_000.0;
                    ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 8000.0) as i16
                })
                .collect();
            assert_eq!(process_pcm16(handle, &mut block), OK);
            shifted |= block.iter().any(|&s| s != 0);
        }
        assert!(shifted);

        let (status, cents) = get_param(handle, PARAM_PITCH_CENTS);
        assert_eq!(status, OK);
        assert_eq!(cents, -3177);
        let (status, enabled) = get_param(handle, PARAM_ENABLED);
        assert_eq!((status, enabled), (OK, 1));
        let (status, latency) = get_param(handle, PARAM_LATENCY_MS);
        assert_eq!(status, OK);
        assert!(latency > 0);
        let (status, _) = get_param(handle, 99);
        assert_eq!(status, BAD_VALUE);

        let mut reply = 0u32;
        let mut reply_size = 4u32;
        let status = unsafe {
            (itfe(handle).command)(
                handle,
                CMD_GET_FAULT_COUNT,
                0,
                ptr::null_mut(),
                &mut reply_size,
                &mut reply as *mut u32 as *mut c_void,
            )
        };
        assert_eq!((status, reply), (OK, 0));

        let mut mode = (AudioMode::InCall as i32).to_ne_bytes();
        assert_eq!(command(handle, EFFECT_CMD_SET_AUDIO_MODE, &mut mode).0, OK);

        let mut ratio = 2.5f32.to_ne_bytes();
        assert_eq!(command(handle, CMD_SET_PITCH_RATIO, &mut ratio), (OK, BAD_VALUE));

        assert_eq!(command(handle, 0x7777, &mut []).0, BAD_VALUE);
        assert_eq!(command(handle, EFFECT_CMD_DISABLE, &mut []), (OK, OK));

        let mut block = vec![1234i16; FRAMES * 2];
        assert_eq!(process_pcm16(handle, &mut block), OK);
        assert!(block.iter().all(|&s| s == 1234));

        assert_eq!(unsafe { EffectRelease(handle) }, OK);
    }

    #[test]
    fn test_init_keeps_running_effect_running() {
        let handle = create();
        assert_eq!(command(handle, EFFECT_CMD_INIT, &mut []), (OK, OK));
        assert_eq!(command(handle, EFFECT_CMD_ENABLE, &mut []), (OK, OK));
        let mut block = vec![500i16; FRAMES * 2];
        assert_eq!(process_pcm16(handle, &mut block), OK);

        assert_eq!(command(handle, EFFECT_CMD_INIT, &mut []), (OK, OK));
        for _ in 0..20 {
            let mut block = vec![500i16; FRAMES * 2];
            assert_eq!(process_pcm16(handle, &mut block), OK);
        }
        let (status, enabled) = get_param(handle, PARAM_ENABLED);
        assert_eq!((status, enabled), (OK, 1));
        assert_eq!(unsafe { EffectRelease(handle) }, OK);
    }

    #[test]
    fn test_get_descriptor_command() {
        let handle = create();
        let mut descriptor = DESCRIPTOR;
        descriptor.uuid = TYPE_UUID;
        let mut reply_size = size_of::<EffectDescriptor>() as u32;
        let status = unsafe {
            (itfe(handle).command)(
                handle,
                EFFECT_CMD_GET_DESCRIPTOR,
                0,
                ptr::null_mut(),
                &mut reply_size,
                &mut descriptor as *mut EffectDescriptor as *mut c_void,
            )
        };
        assert_eq!(status, OK);
        assert_eq!(reply_size as usize, size_of::<EffectDescriptor>());
        assert_eq!(descriptor.uuid, IMPL_UUID);

        // a reply too small for the descriptor is rejected
        let (status, _) = command(handle, EFFECT_CMD_GET_DESCRIPTOR, &mut []);
        assert_eq!(status, BAD_VALUE);
        assert_eq!(unsafe { EffectRelease(handle) }, OK);
    }

    #[test]
    fn test_set_config_rejects_bad_formats() {
        let handle = create();
        let mut cfg = EffectConfig::default();
        cfg.input_cfg.format = 0x3;
        cfg.output_cfg.format = 0x3;
        let mut payload = vec![0u8; size_of::<EffectConfig>()];
        unsafe { ptr::write_unaligned(payload.as_mut_ptr() as *mut EffectConfig, cfg) };
        assert_eq!(command(handle, EFFECT_CMD_SET_CONFIG, &mut payload), (OK, BAD_VALUE));

        let mut short = vec![0u8; 8];
        assert_eq!(command(handle, EFFECT_CMD_SET_CONFIG, &mut short).0, BAD_VALUE);
        assert_eq!(unsafe { EffectRelease(handle) }, OK);
    }

    #[test]
    fn test_double_release_is_rejected() {
        let handle = create();
        assert_eq!(unsafe { EffectRelease(handle) }, OK);
        assert_eq!(unsafe { EffectRelease(handle) }, INVALID_STATE);
    }
}
