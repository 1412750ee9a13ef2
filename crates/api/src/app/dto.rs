use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lure_core::UserId;
use lure_infra::{CreateUserDto, UpdateUserDto, UserDto};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
}

impl From<CreateUserRequest> for CreateUserDto {
    fn from(req: CreateUserRequest) -> Self {
        CreateUserDto {
            name: req.name,
            email: req.email,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: String,
    pub email: String,
}

impl From<UpdateUserRequest> for UpdateUserDto {
    fn from(req: UpdateUserRequest) -> Self {
        UpdateUserDto {
            name: req.name,
            email: req.email,
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub id: UserId,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
}

impl From<UserDto> for UserResponse {
    fn from(user: UserDto) -> Self {
        UserResponse {
            id: user.id,
            created_at: user.created_at,
            updated_at: user.updated_at,
            name: user.name,
            email: user.email,
        }
    }
}
