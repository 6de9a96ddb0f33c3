//! flock-autoscale: load-driven fleet scaling.
//!
//! Each tick pushes a load sample into a fixed-size window, reads a fleet
//! census from the registry, and takes at most one scaling action.
//!
//! # Scaling Algorithm
//!
//! ```text
//! sample   = sum(in_flight of Ready workers)   (or an external sample)
//! smoothed = mean(window) once full, else the latest sample
//! live     = Ready + Initializing + Provisioning
//! pending  = Initializing + Provisioning
//!
//! if pending == 0 and live < min_workers:
//!     launch one worker                         // replenish the floor
//! if smoothed > scale_up_threshold and live < max_workers and pending == 0:
//!     launch one worker
//! if smoothed < scale_down_threshold and Ready > min_workers and live == Ready:
//!     drain the least-loaded Ready worker, then terminate and remove it
//! ```
//!
//! A launch is never issued while another worker is still coming up, and a
//! scale-down never happens while the fleet is growing.

pub mod scaler;
pub mod window;

pub use scaler::{Autoscaler, ScaleDecision, ScaleIntent};
pub use window::LoadWindow;
