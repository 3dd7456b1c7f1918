//! Identification-field reseeding.
//!
//! When active, every IPv4 frame gets a fresh identification drawn
//! uniformly from the full 16-bit range, whatever it carried before. The
//! header checksum is recomputed so the rewritten frame stays valid.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::frame::Frame;

#[derive(Debug)]
pub struct Mitigator<R = StdRng> {
    active: bool,
    rng: R,
}

impl Mitigator<StdRng> {
    pub fn new(active: bool) -> Self {
        Self::with_rng(active, StdRng::from_entropy())
    }

    pub fn seeded(active: bool, seed: u64) -> Self {
        Self::with_rng(active, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Mitigator<R> {
    pub fn with_rng(active: bool, rng: R) -> Self {
        Self { active, rng }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Rewrite the identification in place. Returns whether the frame was
    /// touched; inactive mitigation and non-IPv4 frames pass unchanged.
    pub fn mitigate(&mut self, frame: &mut Frame) -> bool {
        if !self.active {
            return false;
        }
        let id: u16 = self.rng.gen_range(0..=u16::MAX);
        match frame.set_identification(id) {
            Ok(()) => true,
            Err(e) => {
                trace!("Not mitigating frame: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBuilder;

    #[test]
    fn inactive_is_identity() {
        let mut m = Mitigator::new(false);
        let original = FrameBuilder::new().identification(65).build();
        let mut frame = original.clone();
        assert!(!m.mitigate(&mut frame));
        assert_eq!(frame, original);
    }

    #[test]
    fn printable_id_is_destroyed() {
        let mut m = Mitigator::seeded(true, 7);
        let template = FrameBuilder::new()
            .identification(65)
            .payload(b"CovertChannel:A".to_vec())
            .build();
        let trials = 10_000;
        let mut changed = 0;
        for _ in 0..trials {
            let mut frame = template.clone();
            assert!(m.mitigate(&mut frame));
            let parsed = frame.parse().unwrap();
            if parsed.identification != 65 {
                changed += 1;
            }
        }
        assert!(changed * 100 >= trials * 99, "only {changed} of {trials} changed");
    }

    #[test]
    fn output_does_not_track_input() {
        // Same seed, different inputs: identical outputs.
        let mut a = Mitigator::seeded(true, 42);
        let mut b = Mitigator::seeded(true, 42);
        for input in [0u16, 65, 126, 40000] {
            let mut fa = FrameBuilder::new().identification(input).build();
            let mut fb = FrameBuilder::new().identification(input.wrapping_add(1)).build();
            a.mitigate(&mut fa);
            b.mitigate(&mut fb);
            assert_eq!(
                fa.parse().unwrap().identification,
                fb.parse().unwrap().identification
            );
        }
    }

    #[test]
    fn rewritten_frame_keeps_valid_checksum() {
        let mut m = Mitigator::seeded(true, 1);
        let mut frame = FrameBuilder::new().identification(90).build();
        m.mitigate(&mut frame);
        let parsed = frame.parse().unwrap();
        let ip = &frame.as_bytes()[parsed.ip_offset..parsed.ip_offset + parsed.header_len];
        assert_eq!(crate::frame::internet_checksum(ip), 0);
    }

    #[test]
    fn non_ip_frames_pass_through() {
        let mut m = Mitigator::seeded(true, 3);
        let mut frame = Frame::new(vec![0xAB; 12]);
        assert!(!m.mitigate(&mut frame));
        assert_eq!(frame.as_bytes(), &[0xAB; 12]);
    }
}
