use crate::auth::AuthUser;
use axum::Json;
use shared::models::User;

pub async fn get_me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}
