//! What host crates import from the crate root

use audioshift_dsp::{f32_to_pcm16, pcm16_to_f32, ratio, ProfileKind, MAX_RATIO, MIN_RATIO};

#[test]
fn test_root_exports_cover_host_needs() {
    assert!((MIN_RATIO..=MAX_RATIO).contains(&ratio::ratio()));

    let pcm = [i16::MIN, -16384, 0, 16384, i16::MAX];
    let mut float = [0.0f32; 5];
    pcm16_to_f32(&pcm, &mut float);
    assert_eq!(float[0], -1.0);
    assert_eq!(float[2], 0.0);

    let mut back = [0i16; 5];
    f32_to_pcm16(&float, &mut back);
    assert_eq!(back, pcm);

    for kind in ProfileKind::ALL {
        assert_eq!(ProfileKind::of(kind.profile()), Some(kind));
    }
}
