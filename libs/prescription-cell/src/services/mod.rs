pub mod check_in;
pub mod prescription;
pub mod rules;

pub use check_in::CheckInService;
pub use prescription::PrescriptionService;
pub use rules::RefillRules;
