//! Affine polynomials over symbolic index names.
//!
//! An access polynomial like `2*i + j/2 + 1` maps loop indices to buffer
//! offsets. Coefficients are exact rationals so that stride division (e.g.
//! dilated or fractionally-strided accesses) survives intermediate algebra;
//! they are floored only when a final integer stride is extracted.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// An exact rational number, always kept reduced with a positive
/// denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    num: i64,
    den: i64,
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}

impl Rational {
    pub fn new(num: i64, den: i64) -> Self {
        assert!(den != 0, "rational with zero denominator");
        let g = gcd(num, den);
        let sign = if den < 0 { -1 } else { 1 };
        Self { num: sign * num / g, den: sign * den / g }
    }

    pub fn zero() -> Self {
        Self { num: 0, den: 1 }
    }

    pub fn one() -> Self {
        Self { num: 1, den: 1 }
    }

    pub fn is_zero(self) -> bool {
        self.num == 0
    }

    pub fn is_one(self) -> bool {
        self.num == 1 && self.den == 1
    }

    pub fn is_integer(self) -> bool {
        self.den == 1
    }

    /// Floor to the nearest integer towards negative infinity.
    pub fn floor(self) -> i64 {
        self.num.div_euclid(self.den)
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<i64> for Rational {
    fn from(v: i64) -> Self {
        Self { num: v, den: 1 }
    }
}

impl Add for Rational {
    type Output = Rational;
    fn add(self, rhs: Rational) -> Rational {
        Rational::new(self.num * rhs.den + rhs.num * self.den, self.den * rhs.den)
    }
}

impl Sub for Rational {
    type Output = Rational;
    fn sub(self, rhs: Rational) -> Rational {
        self + (-rhs)
    }
}

impl Mul for Rational {
    type Output = Rational;
    fn mul(self, rhs: Rational) -> Rational {
        Rational::new(self.num * rhs.num, self.den * rhs.den)
    }
}

impl Neg for Rational {
    type Output = Rational;
    fn neg(self) -> Rational {
        Rational { num: -self.num, den: self.den }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 { write!(f, "{}", self.num) } else { write!(f, "{}/{}", self.num, self.den) }
    }
}

/// An affine expression `c + Σ coeff_i · idx_i` over named indices.
///
/// Terms are held in a sorted map so iteration (and therefore everything
/// derived from a polynomial) is deterministic. Zero coefficients are never
/// stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Polynomial {
    constant: Rational,
    terms: BTreeMap<String, Rational>,
}

impl Polynomial {
    /// The polynomial `1 · name`.
    pub fn index(name: impl Into<String>) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(name.into(), Rational::one());
        Self { constant: Rational::zero(), terms }
    }

    pub fn constant(value: impl Into<Rational>) -> Self {
        Self { constant: value.into(), terms: BTreeMap::new() }
    }

    pub fn constant_term(&self) -> Rational {
        self.constant
    }

    /// Coefficient of `name`, zero when absent.
    pub fn coeff(&self, name: &str) -> Rational {
        self.terms.get(name).copied().unwrap_or_default()
    }

    /// `Some(name)` when this is exactly `1 · name` with no constant.
    pub fn as_single_index(&self) -> Option<&str> {
        if !self.constant.is_zero() || self.terms.len() != 1 {
            return None;
        }
        let (name, coeff) = self.terms.iter().next()?;
        coeff.is_one().then_some(name.as_str())
    }

    /// Variable terms in name order.
    pub fn var_terms(&self) -> impl Iterator<Item = (&str, Rational)> {
        self.terms.iter().map(|(n, &c)| (n.as_str(), c))
    }

    pub fn num_vars(&self) -> usize {
        self.terms.len()
    }

    fn set(&mut self, name: String, coeff: Rational) {
        if coeff.is_zero() {
            self.terms.remove(&name);
        } else {
            self.terms.insert(name, coeff);
        }
    }
}

impl Add for Polynomial {
    type Output = Polynomial;
    fn add(mut self, rhs: Polynomial) -> Polynomial {
        self += rhs;
        self
    }
}

impl AddAssign for Polynomial {
    fn add_assign(&mut self, rhs: Polynomial) {
        self.constant = self.constant + rhs.constant;
        for (name, coeff) in rhs.terms {
            let merged = self.coeff(&name) + coeff;
            self.set(name, merged);
        }
    }
}

impl Mul<Rational> for Polynomial {
    type Output = Polynomial;
    fn mul(mut self, rhs: Rational) -> Polynomial {
        if rhs.is_zero() {
            return Polynomial::default();
        }
        self.constant = self.constant * rhs;
        for coeff in self.terms.values_mut() {
            *coeff = *coeff * rhs;
        }
        self
    }
}

impl Mul<i64> for Polynomial {
    type Output = Polynomial;
    fn mul(self, rhs: i64) -> Polynomial {
        self * Rational::from(rhs)
    }
}

impl fmt::Display for Polynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, coeff) in &self.terms {
            if !first {
                write!(f, " + ")?;
            }
            first = false;
            if coeff.is_one() { write!(f, "{name}")? } else { write!(f, "{coeff}*{name}")? }
        }
        if !self.constant.is_zero() || first {
            if !first {
                write!(f, " + ")?;
            }
            write!(f, "{}", self.constant)?;
        }
        Ok(())
    }
}
