//! Effect identity: UUIDs and the descriptor handed to the host.

use std::ffi::c_char;
use std::fmt;

/// Host effect-framework UUID layout
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectUuid {
    pub time_low: u32,
    pub time_mid: u16,
    pub time_hi_and_version: u16,
    pub clock_seq: u16,
    pub node: [u8; 6],
}

impl fmt::Display for EffectUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-",
            self.time_low, self.time_mid, self.time_hi_and_version, self.clock_seq
        )?;
        for b in self.node {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Effect type: pitch shifting
pub const TYPE_UUID: EffectUuid = EffectUuid {
    time_low: 0x7b49_1460,
    time_mid: 0x8d4d,
    time_hi_and_version: 0x11e0,
    clock_seq: 0xbd61,
    node: [0x00, 0x02, 0xa5, 0xd5, 0xc5, 0x1b],
};

/// This implementation
pub const IMPL_UUID: EffectUuid = EffectUuid {
    time_low: 0xf22a_9ce0,
    time_mid: 0x7a11,
    time_hi_and_version: 0x11ee,
    clock_seq: 0xb962,
    node: [0x02, 0x42, 0xac, 0x12, 0x00, 0x02],
};

pub const EFFECT_CONTROL_API_VERSION: u32 = 0x0002_0000;

pub const EFFECT_FLAG_TYPE_INSERT: u32 = 0;
pub const EFFECT_FLAG_INSERT_LAST: u32 = 2 << 3;
pub const EFFECT_FLAG_DEVICE_IND: u32 = 1 << 10;
pub const EFFECT_FLAG_AUDIO_MODE_IND: u32 = 1 << 12;

pub const EFFECT_STRING_LEN_MAX: usize = 64;

pub const EFFECT_NAME: &str = "AudioShift 432Hz";
pub const EFFECT_IMPLEMENTOR: &str = "AudioShift Project";

/// Host-visible effect descriptor
#[repr(C)]
#[derive(Clone, Copy)]
pub struct EffectDescriptor {
    pub type_uuid: EffectUuid,
    pub uuid: EffectUuid,
    pub api_version: u32,
    pub flags: u32,
    /// Tenths of a MIPS
    pub cpu_load: u16,
    /// KiB
    pub memory_usage: u16,
    pub name: [c_char; EFFECT_STRING_LEN_MAX],
    pub implementor: [c_char; EFFECT_STRING_LEN_MAX],
}

impl fmt::Debug for EffectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectDescriptor")
            .field("type_uuid", &self.type_uuid.to_string())
            .field("uuid", &self.uuid.to_string())
            .field("flags", &self.flags)
            .field("name", &EFFECT_NAME)
            .finish()
    }
}

/// NUL-padded fixed-size C string
const fn c_string(s: &str) -> [c_char; EFFECT_STRING_LEN_MAX] {
    let bytes = s.as_bytes();
    let mut out = [0 as c_char; EFFECT_STRING_LEN_MAX];
    let mut i = 0;
    while i < bytes.len() && i < EFFECT_STRING_LEN_MAX - 1 {
        out[i] = bytes[i] as c_char;
        i += 1;
    }
    out
}

pub const DESCRIPTOR: EffectDescriptor = EffectDescriptor {
    type_uuid: TYPE_UUID,
    uuid: IMPL_UUID,
    api_version: EFFECT_CONTROL_API_VERSION,
    flags: EFFECT_FLAG_TYPE_INSERT | EFFECT_FLAG_INSERT_LAST | EFFECT_FLAG_DEVICE_IND | EFFECT_FLAG_AUDIO_MODE_IND,
    cpu_load: 500,
    memory_usage: 64,
    name: c_string(EFFECT_NAME),
    implementor: c_string(EFFECT_IMPLEMENTOR),
};

pub fn descriptor() -> EffectDescriptor {
    DESCRIPTOR
}
