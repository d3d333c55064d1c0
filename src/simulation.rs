use serde::Serialize;
use thiserror::Error;

use crate::models::AnnotatedSeries;

#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    #[error("principal must be a positive amount, got {0}")]
    InvalidPrincipal(f64),
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Profit,
    Loss,
    Unchanged,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SimulationStatus {
    Complete,
    /// No defined daily change to compound (empty or single-bar series).
    InsufficientData,
    /// A step of -100% or worse drove the multiplier to zero or below.
    Degenerate { first_index: usize },
}

/// Cumulative value multipliers, one per bar.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct InvestmentTrajectory {
    pub multipliers: Vec<f64>,
}

impl InvestmentTrajectory {
    pub fn last(&self) -> Option<f64> {
        self.multipliers.last().copied()
    }

    pub fn first_non_positive(&self) -> Option<usize> {
        self.multipliers.iter().position(|m| *m <= 0.0)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub principal: f64,
    pub final_value: f64,
    pub trajectory: InvestmentTrajectory,
    pub status: SimulationStatus,
    /// `None` when there was not enough data to simulate.
    pub classification: Option<Classification>,
}

pub fn validate_principal(principal: f64) -> Result<f64, SimulationError> {
    if principal.is_finite() && principal > 0.0 {
        Ok(principal)
    } else {
        Err(SimulationError::InvalidPrincipal(principal))
    }
}

pub fn classify(principal: f64, final_value: f64) -> Classification {
    if final_value > principal {
        Classification::Profit
    } else if final_value < principal {
        Classification::Loss
    } else {
        Classification::Unchanged
    }
}

/// Compounds the daily changes of `annotated` onto `principal`.
///
/// Undefined changes leave the multiplier as is. Wipeouts are propagated,
/// never clamped; they show up as [`SimulationStatus::Degenerate`].
pub fn simulate(
    annotated: &AnnotatedSeries,
    principal: f64,
) -> Result<SimulationResult, SimulationError> {
    let principal = validate_principal(principal)?;

    let multipliers: Vec<f64> = annotated
        .changes()
        .scan(1.0_f64, |running, change| {
            *running *= 1.0 + change.unwrap_or(0.0) / 100.0;
            Some(*running)
        })
        .collect();
    let trajectory = InvestmentTrajectory { multipliers };

    let final_value = trajectory.last().map_or(principal, |m| principal * m);

    let has_defined_change = annotated.changes().any(|c| c.is_some());
    let status = if !has_defined_change {
        SimulationStatus::InsufficientData
    } else if let Some(first_index) = trajectory.first_non_positive() {
        SimulationStatus::Degenerate { first_index }
    } else {
        SimulationStatus::Complete
    };

    let classification = match status {
        SimulationStatus::InsufficientData => None,
        _ => Some(classify(principal, final_value)),
    };

    Ok(SimulationResult {
        principal,
        final_value,
        trajectory,
        status,
        classification,
    })
}
