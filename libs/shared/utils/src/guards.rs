use shared_models::auth::{Role, User};
use shared_models::error::AppError;

pub fn require_role(user: &User, allowed: &[Role]) -> Result<(), AppError> {
    let role = user.role();
    if allowed.contains(&role) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{} role is not permitted to perform this action",
            role
        )))
    }
}

pub fn require_admin(user: &User) -> Result<(), AppError> {
    require_role(user, &[Role::Admin])
}

/// Patients may only touch their own records; providers and admins may read any.
pub fn ensure_self_or_staff(user: &User, owner_id: &str) -> Result<(), AppError> {
    if user.id == owner_id || user.role().is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Not authorized to access this record".to_string(),
        ))
    }
}

pub fn ensure_self_or_admin(user: &User, owner_id: &str) -> Result<(), AppError> {
    if user.id == owner_id || user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Not authorized to modify this record".to_string(),
        ))
    }
}
