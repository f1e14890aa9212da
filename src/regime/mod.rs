// =============================================================================
// Market regime — simple SMA/VIX classifier, HMM detector, Kalman filter,
// and the shared regime-monitor state document
// =============================================================================

pub mod hmm;
pub mod kalman;
pub mod simple;
pub mod state;
