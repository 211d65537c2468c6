//! Rescue permutation over the Mersenne prime field GF(2^127 - 1)
//!
//! Width 4, 10 rounds, S-box `x^5` alternating with its inverse `x^(1/5)`,
//! a Cauchy MDS matrix, and round constants expanded from SHA-256 under a
//! fixed domain string. All arithmetic stays in `u128`.

use std::ops::{Add, Mul, Sub};
use std::sync::OnceLock;

use crate::hash::sha256_parts;

/// Field modulus `2^127 - 1`
pub const P: u128 = (1u128 << 127) - 1;

pub const WIDTH: usize = 4;
pub const ROUNDS: usize = 10;

const ALPHA: u128 = 5;
/// `5^-1 mod (p - 1)`; `p - 1 ≡ 1 (mod 5)` gives `4 * (p - 2) / 5 + 1`.
const ALPHA_INV: u128 = 4 * ((P - 2) / 5) + 1;

const CONSTANTS_DOMAIN: &[u8] = b"shade-rescue-m127-v1";
const MASK64: u128 = (1u128 << 64) - 1;

/// A field element, always fully reduced (`< P`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Fe(u128);

impl Fe {
    pub const ZERO: Fe = Fe(0);
    pub const ONE: Fe = Fe(1);

    pub fn new(x: u128) -> Self {
        Fe(reduce(x))
    }

    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Fe::new(u128::from_le_bytes(bytes))
    }

    pub fn value(self) -> u128 {
        self.0
    }

    pub fn pow(self, mut exp: u128) -> Fe {
        let mut base = self;
        let mut acc = Fe::ONE;
        while exp > 0 {
            if exp & 1 == 1 {
                acc = acc * base;
            }
            base = base * base;
            exp >>= 1;
        }
        acc
    }

    /// Multiplicative inverse; zero maps to zero.
    pub fn inverse(self) -> Fe {
        self.pow(P - 2)
    }
}

fn reduce(x: u128) -> u128 {
    let r = (x & P) + (x >> 127);
    if r >= P {
        r - P
    } else {
        r
    }
}

impl Add for Fe {
    type Output = Fe;

    fn add(self, rhs: Fe) -> Fe {
        // both operands < 2^127, so the sum fits
        Fe(reduce(self.0 + rhs.0))
    }
}

impl Sub for Fe {
    type Output = Fe;

    fn sub(self, rhs: Fe) -> Fe {
        if self.0 >= rhs.0 {
            Fe(self.0 - rhs.0)
        } else {
            Fe(self.0 + (P - rhs.0))
        }
    }
}

impl Mul for Fe {
    type Output = Fe;

    fn mul(self, rhs: Fe) -> Fe {
        let (a1, a0) = (self.0 >> 64, self.0 & MASK64);
        let (b1, b0) = (rhs.0 >> 64, rhs.0 & MASK64);

        let lo = a0 * b0;
        let mid = a1 * b0 + a0 * b1;
        let hi = a1 * b1;

        let (lo, carry) = lo.overflowing_add(mid << 64);
        let hi = hi + (mid >> 64) + carry as u128;

        // hi * 2^128 + lo, and 2^128 ≡ 2 (mod p)
        Fe(reduce(hi << 1)) + Fe(reduce(lo))
    }
}

/// Precomputed permutation parameters.
pub struct Rescue {
    mds: [[Fe; WIDTH]; WIDTH],
    constants: Vec<[Fe; WIDTH]>,
}

impl Rescue {
    pub fn new() -> Self {
        let mut mds = [[Fe::ZERO; WIDTH]; WIDTH];
        for (i, row) in mds.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                // Cauchy: 1 / (x_i + y_j) with x_i = i, y_j = WIDTH + j
                *cell = Fe::new((i + j + WIDTH) as u128).inverse();
            }
        }

        let constants = (0..2 * ROUNDS + 1)
            .map(|step| {
                let mut v = [Fe::ZERO; WIDTH];
                for (lane, slot) in v.iter_mut().enumerate() {
                    let counter = ((step * WIDTH + lane) as u32).to_le_bytes();
                    let digest = sha256_parts(&[CONSTANTS_DOMAIN, &counter]);
                    let mut half = [0u8; 16];
                    half.copy_from_slice(&digest[..16]);
                    *slot = Fe::from_le_bytes(half);
                }
                v
            })
            .collect();

        Self { mds, constants }
    }

    /// Process-wide instance; parameters never change after construction.
    pub fn shared() -> &'static Rescue {
        static INSTANCE: OnceLock<Rescue> = OnceLock::new();
        INSTANCE.get_or_init(Rescue::new)
    }

    pub fn permute(&self, mut state: [Fe; WIDTH]) -> [Fe; WIDTH] {
        add_assign(&mut state, &self.constants[0]);
        for round in 0..ROUNDS {
            sbox(&mut state, ALPHA);
            state = self.mix(&state);
            add_assign(&mut state, &self.constants[2 * round + 1]);

            sbox(&mut state, ALPHA_INV);
            state = self.mix(&state);
            add_assign(&mut state, &self.constants[2 * round + 2]);
        }
        state
    }

    /// Keystream element for `counter` under a two-element key and a nonce.
    pub fn keystream(&self, key: [Fe; 2], nonce: Fe, counter: u64) -> Fe {
        self.permute([key[0], key[1], nonce, Fe::new(counter as u128)])[0]
    }

    fn mix(&self, state: &[Fe; WIDTH]) -> [Fe; WIDTH] {
        let mut out = [Fe::ZERO; WIDTH];
        for (i, row) in self.mds.iter().enumerate() {
            out[i] = row
                .iter()
                .zip(state.iter())
                .fold(Fe::ZERO, |acc, (&m, &s)| acc + m * s);
        }
        out
    }
}

impl Default for Rescue {
    fn default() -> Self {
        Self::new()
    }
}

fn sbox(state: &mut [Fe; WIDTH], exp: u128) {
    for x in state.iter_mut() {
        *x = x.pow(exp);
    }
}

fn add_assign(state: &mut [Fe; WIDTH], rc: &[Fe; WIDTH]) {
    for (x, c) in state.iter_mut().zip(rc.iter()) {
        *x = *x + *c;
    }
}
