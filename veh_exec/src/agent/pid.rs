//! # Lateral PID controller
//!
//! Windowed PID on the scaled lateral error. The integral is the sum of the retained error
//! history and the derivative is taken against a reference sample chosen by [`DerivativeRef`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use util::maths::clamp;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A lateral PID controller with a bounded error history
#[derive(Debug, Clone)]
pub struct LatPid {
    k_p: f32,
    k_d: f32,
    k_i: f32,
    max_history: usize,
    derivative_ref: DerivativeRef,
    history: VecDeque<f32>,
}

/// Individual terms of one controller update.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PidOutput {
    pub p: f32,
    pub i: f32,
    pub d: f32,

    /// Sum of the terms clamped into [-1, 1]
    pub output: f32,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Sample the derivative term is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivativeRef {
    /// Oldest sample still in the history
    Oldest,

    /// Sample from the previous update
    Previous,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for DerivativeRef {
    fn default() -> Self {
        DerivativeRef::Oldest
    }
}

impl LatPid {
    /// Create a new controller. A history length of zero is treated as one.
    pub fn new(
        k_p: f32,
        k_d: f32,
        k_i: f32,
        max_history: usize,
        derivative_ref: DerivativeRef,
    ) -> Self {
        let max_history = max_history.max(1);

        Self {
            k_p,
            k_d,
            k_i,
            max_history,
            derivative_ref,
            history: VecDeque::with_capacity(max_history),
        }
    }

    /// Push a new error and compute the controller output.
    pub fn update(&mut self, error: f32) -> PidOutput {
        let previous = self.history.back().copied();

        self.history.push_back(error);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }

        let reference = match self.derivative_ref {
            DerivativeRef::Oldest => self.history.front().copied(),
            DerivativeRef::Previous => previous,
        }
        .unwrap_or(error);

        let p = self.k_p * error;
        let d = self.k_d * (error - reference);
        let i = self.k_i * self.history.iter().sum::<f32>();

        PidOutput {
            p,
            i,
            d,
            output: clamp(p + i + d, -1.0, 1.0),
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &f32> {
        self.history.iter()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
