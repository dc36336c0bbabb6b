use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::get,
    Json, Router,
};
use tracing::instrument;

use crate::{
    app::route_not_found,
    error::AppError,
    state::AppState,
    users::{
        dto::{CreateUserRequest, Envelope, ListUsersQuery, PageInfo, UpdateUserRequest},
        repo_types::User,
        validation::{parse_user_id, validate_create, validate_list, validate_update},
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users",
            get(list_users).post(create_user).fallback(route_not_found),
        )
        .route(
            "/users/:id",
            get(get_user)
                .put(update_user)
                .delete(delete_user)
                .fallback(route_not_found),
        )
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, HeaderMap, Json<Envelope<User>>), AppError> {
    let Json(payload) = payload?;
    let new_user = validate_create(payload)?;
    let user = state.users.create(new_user).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/api/users/{}", user.id)) {
        headers.insert(header::LOCATION, location);
    }

    Ok((
        StatusCode::CREATED,
        headers,
        Json(Envelope::data(user).with_message("User created successfully")),
    ))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<User>>, AppError> {
    let id = parse_user_id(&id)?;
    let user = state.users.get_by_id(id).await?;
    Ok(Json(Envelope::data(user)))
}

#[instrument(skip(state, query))]
pub async fn list_users(
    State(state): State<AppState>,
    query: Result<Query<ListUsersQuery>, QueryRejection>,
) -> Result<Json<Envelope<Vec<User>>>, AppError> {
    let Query(query) = query?;
    let filter = validate_list(query)?;
    let page = state.users.list(&filter).await?;

    let pagination = PageInfo::new(page.total, filter.limit, filter.offset);
    Ok(Json(Envelope::data(page.users).with_pagination(pagination)))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<Envelope<User>>, AppError> {
    let id = parse_user_id(&id)?;
    let Json(payload) = payload?;
    let changes = validate_update(payload)?;
    let user = state.users.update(id, changes).await?;

    Ok(Json(
        Envelope::data(user).with_message("User updated successfully"),
    ))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<()>>, AppError> {
    let id = parse_user_id(&id)?;
    if !state.users.delete(id).await? {
        return Err(AppError::NotFound("User"));
    }

    Ok(Json(Envelope::message("User deleted successfully")))
}
