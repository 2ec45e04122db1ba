use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::storage::schema::{goals, kids, parents, point_transactions};

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = parents)]
pub struct Parent {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = parents)]
pub struct NewParent<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = kids)]
#[diesel(belongs_to(Parent, foreign_key = parent_id))]
pub struct Kid {
    pub id: i32,
    pub parent_id: i32,
    pub name: String,
    pub age: Option<i32>,
    pub total_points: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = kids)]
pub struct NewKid<'a> {
    pub parent_id: i32,
    pub name: &'a str,
    pub age: Option<i32>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = point_transactions)]
#[diesel(belongs_to(Kid, foreign_key = kid_id))]
pub struct PointTransaction {
    pub id: i32,
    pub kid_id: i32,
    pub points: i32,
    pub description: String,
    pub kind: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = point_transactions)]
pub struct NewPointTransaction<'a> {
    pub kid_id: i32,
    pub points: i32,
    pub description: &'a str,
    pub kind: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = goals)]
#[diesel(belongs_to(Kid, foreign_key = kid_id))]
pub struct Goal {
    pub id: i32,
    pub kid_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub points_required: i32,
    pub is_achieved: bool,
    pub created_at: NaiveDateTime,
    pub achieved_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = goals)]
pub struct NewGoal<'a> {
    pub kid_id: i32,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub points_required: i32,
}
