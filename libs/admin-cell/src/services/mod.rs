pub mod admin;
pub mod dashboard;

pub use admin::AdminService;
pub use dashboard::DashboardService;
