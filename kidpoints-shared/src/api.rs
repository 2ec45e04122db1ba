//! Wire DTOs for the HTTP API. Field names are camelCase on the wire; the
//! transaction discriminant travels as `type`.

use serde::{Deserialize, Serialize};

use crate::domain::{GoalId, KidId, TransactionKind};

// Auth
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterReq {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
    pub session: SessionDto,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDto {
    pub parent_id: i32,
    pub parent_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid_id: Option<KidId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid_name: Option<String>,
}

// Kids
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KidDto {
    pub id: KidId,
    pub name: String,
    pub age: Option<i32>,
    pub total_points: i32,
    pub created_at: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateKidReq {
    pub name: String,
    pub age: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateKidReq {
    pub name: Option<String>,
    pub age: Option<i32>,
}

// Points
#[derive(Debug, Serialize, Deserialize)]
pub struct PointsReq {
    pub points: i32,
    pub description: String,
    /// "reward" or "penalty"; validated by the handler so bad values get a
    /// descriptive 400 instead of a deserialization rejection.
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointTransactionDto {
    pub id: i32,
    pub kid_id: KidId,
    pub points: i32,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub created_at: String, // RFC3339 UTC
}

// Goals
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGoalReq {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub points_required: i32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalDto {
    pub id: GoalId,
    pub kid_id: KidId,
    pub title: String,
    pub description: Option<String>,
    pub points_required: i32,
    pub is_achieved: bool,
    pub created_at: String,           // RFC3339 UTC
    pub achieved_at: Option<String>,  // RFC3339 UTC, set iff is_achieved
}

// Stats
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KidStatsDto {
    pub total_points: i32,
    pub total_rewards: i64,
    pub total_penalties: i64,
    pub goals_achieved: i64,
    pub goals_total: i64,
}
