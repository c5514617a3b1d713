//! Pseudo-random number generation
//!
//! Xorshift128+ seeded from the timestamp counter, the PIT, and the system
//! control port. Not cryptographic; it feeds the stack canary and nothing
//! with a stronger requirement. Fresh timestamp bits are folded in every
//! thousand draws so the stream does not stay a pure function of the boot
//! seed.

use spin::Mutex;

struct XorshiftState {
    s: [u64; 2],
    draws: u32,
}

static STATE: Mutex<XorshiftState> = Mutex::new(XorshiftState { s: [0, 0], draws: 0 });

const WARMUP_ROUNDS: usize = 100;
const RESEED_INTERVAL: u32 = 1000;

/// Gather whatever entropy the platform offers.
fn read_entropy() -> (u64, u64) {
    #[cfg(target_arch = "x86")]
    {
        use crate::arch::x86::port::Port;

        let tsc = crate::arch::x86::read_timestamp();
        // SAFETY: PIT channel 0 (0x40) and the system control port (0x61)
        // are read-only side-effect-free sources here.
        let (pit, system) = unsafe {
            let mut pit_port = Port::<u8>::new(0x40);
            let low = pit_port.read() as u64;
            let high = pit_port.read() as u64;
            let system = Port::<u8>::new(0x61).read() as u64;
            ((high << 8) | low, system)
        };
        (
            tsc ^ (pit << 32),
            crate::arch::x86::read_timestamp() ^ (system << 48),
        )
    }
    #[cfg(not(target_arch = "x86"))]
    {
        // Host builds have no hardware sources; a fixed seed keeps the
        // generator deterministic under test.
        (0x9E37_79B9_7F4A_7C15, 0xD1B5_4A32_D192_ED03)
    }
}

/// Seed the generator and warm it up.
pub fn init() {
    {
        let mut state = STATE.lock();
        let (s0, s1) = read_entropy();
        state.s[0] = if s0 == 0 { 1 } else { s0 };
        state.s[1] = if s1 == 0 { 1 } else { s1 };
        state.draws = 0;
    }
    for _ in 0..WARMUP_ROUNDS {
        next_u32();
    }
}

/// Draw 32 random bits.
pub fn next_u32() -> u32 {
    let mut state = STATE.lock();

    let mut s1 = state.s[0];
    let s0 = state.s[1];
    state.s[0] = s0;
    s1 ^= s1 << 23;
    state.s[1] = s1 ^ s0 ^ (s1 >> 18) ^ (s0 >> 5);
    let result = state.s[1].wrapping_add(s0);

    state.draws = state.draws.wrapping_add(1);
    if state.draws % RESEED_INTERVAL == 0 {
        state.s[0] ^= crate::arch::x86::read_timestamp();
        if state.s[0] == 0 {
            state.s[0] = 1;
        }
    }

    ((result >> 32) as u32) ^ (result as u32)
}

/// Fill `buf` with random bytes.
pub fn fill_bytes(buf: &mut [u8]) {
    for chunk in buf.chunks_mut(4) {
        let word = next_u32().to_le_bytes();
        chunk.copy_from_slice(&word[..chunk.len()]);
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn draws_are_not_constant() {
        init();
        let a = next_u32();
        let b = next_u32();
        let c = next_u32();
        assert!(a != b || b != c);
    }

    #[test]
    fn fill_bytes_handles_unaligned_tail() {
        init();
        let mut buf = [0u8; 7];
        fill_bytes(&mut buf);
        // All-zero output from a seeded xorshift128+ is effectively
        // impossible; treat it as failure.
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    fn state_never_sticks_at_zero() {
        init();
        for _ in 0..2048 {
            next_u32();
        }
        let state = STATE.lock();
        assert!(state.s[0] != 0 || state.s[1] != 0);
    }
}
