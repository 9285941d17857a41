//! Automation: trigger → condition → action rules reacting to the
//! simulated environment, plus the scenes they can activate.
//!
//! An [`AutomationRule`] fires when any [`Trigger`] matches and its
//! [`Condition`](crate::rule::Condition)s fold to `true`, then runs its
//! [`Action`]s in order.

mod action;
mod scene;
mod trigger;

pub use action::{Action, ActionKind};
pub use scene::{ActiveScene, Curve, DeviceState, Scene, SceneState, Transition};
pub use trigger::{Trigger, TriggerKind};

use crate::rule::Rule;

/// A rule reacting to events, device state and the wall clock.
pub type AutomationRule = Rule<Trigger, Action>;
