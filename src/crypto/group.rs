//! Fixed public group parameters shared network-wide.
//!
//! Arithmetic happens in the multiplicative group of integers modulo a prime
//! `p`, generated by `g`. The defaults are deliberately tiny (761, 6): the
//! ownership proof is an identification game, not a signature scheme.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default network prime modulus.
pub const DEFAULT_PRIME: u64 = 761;

/// Default generator of the multiplicative group mod [`DEFAULT_PRIME`].
pub const DEFAULT_GENERATOR: u64 = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("Modulus {0} is not prime")]
    NotPrime(u64),

    #[error("{g} does not generate the group modulo {p}")]
    NotGenerator { p: u64, g: u64 },

    #[error("No primitive root found modulo {0}")]
    NoPrimitiveRoot(u64),
}

/// Prime modulus and generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CryptoGroup {
    pub p: u64,
    pub g: u64,
}

impl Default for CryptoGroup {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl CryptoGroup {
    /// The network-wide default parameters.
    pub const DEFAULT: CryptoGroup = CryptoGroup {
        p: DEFAULT_PRIME,
        g: DEFAULT_GENERATOR,
    };

    /// Build a group, checking that `p` is prime and `g` generates it.
    pub fn new(p: u64, g: u64) -> Result<Self, GroupError> {
        if !is_prime(p) {
            return Err(GroupError::NotPrime(p));
        }
        if !is_primitive_root(g, p) {
            return Err(GroupError::NotGenerator { p, g });
        }
        Ok(Self { p, g })
    }

    /// Build a group from a prime, using its smallest primitive root.
    pub fn from_prime(p: u64) -> Result<Self, GroupError> {
        if !is_prime(p) {
            return Err(GroupError::NotPrime(p));
        }
        let g = smallest_primitive_root(p).ok_or(GroupError::NoPrimitiveRoot(p))?;
        Ok(Self { p, g })
    }

    /// Order of the group, `p - 1`. Exponents live modulo this value.
    pub fn order(&self) -> u64 {
        self.p - 1
    }

    /// `g^exp mod p`.
    pub fn exp(&self, exp: u64) -> u64 {
        mod_pow(self.g, exp, self.p)
    }

    /// `base^exp mod p`.
    pub fn pow(&self, base: u64, exp: u64) -> u64 {
        mod_pow(base, exp, self.p)
    }

    /// `a * b mod p`.
    pub fn mul(&self, a: u64, b: u64) -> u64 {
        mod_mul(a, b, self.p)
    }
}

/// Square-and-multiply modular exponentiation.
pub fn mod_pow(base: u64, mut exp: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let mut result = 1u64;
    let mut base = base % modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mod_mul(result, base, modulus);
        }
        exp >>= 1;
        base = mod_mul(base, base, modulus);
    }
    result
}

fn mod_mul(a: u64, b: u64, modulus: u64) -> u64 {
    ((a as u128 * b as u128) % modulus as u128) as u64
}

/// Trial-division primality test using the 6k ± 1 wheel.
pub fn is_prime(n: u64) -> bool {
    if n <= 1 {
        return false;
    }
    if n <= 3 {
        return true;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    let mut i = 5u64;
    while i <= n / i {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }
    true
}

/// Distinct prime factors of `n`.
pub fn prime_factors(mut n: u64) -> Vec<u64> {
    let mut factors = Vec::new();
    if n % 2 == 0 {
        factors.push(2);
        while n % 2 == 0 {
            n /= 2;
        }
    }
    let mut i = 3u64;
    while i <= n / i {
        if n % i == 0 {
            factors.push(i);
            while n % i == 0 {
                n /= i;
            }
        }
        i += 2;
    }
    if n > 2 {
        factors.push(n);
    }
    factors
}

/// Whether `g` generates the multiplicative group modulo the prime `p`.
pub fn is_primitive_root(g: u64, p: u64) -> bool {
    if g % p == 0 {
        return false;
    }
    let phi = p - 1;
    prime_factors(phi)
        .into_iter()
        .all(|q| mod_pow(g, phi / q, p) != 1)
}

/// Smallest primitive root of the prime `p`.
pub fn smallest_primitive_root(p: u64) -> Option<u64> {
    if !is_prime(p) {
        return None;
    }
    if p == 2 {
        return Some(1);
    }
    let phi = p - 1;
    let factors = prime_factors(phi);
    (2..=phi).find(|&r| factors.iter().all(|&q| mod_pow(r, phi / q, p) != 1))
}
