use axum::{http::StatusCode, Json};

use crate::error::{AppError, AppResult};
use crate::guard::{ConfigurationError, RawRequest, RouteSpec, RouteTable};
use crate::middleware::auth::{CallerIdentity, Role};
use crate::models::{HistoryFilter, Page, PageParams, User, UserHistory};
use crate::routes::AppState;

pub fn register(table: &mut RouteTable<AppState>) -> Result<(), ConfigurationError> {
    table
        .register(
            RouteSpec::get("/users")
                .summary("Lists users")
                .require(Role::Admin)
                .responds(StatusCode::OK, "Page of users"),
            list_users,
        )?
        .register(
            RouteSpec::get("/users/me")
                .summary("The calling user")
                .responds(StatusCode::OK, "User"),
            get_me,
        )?
        .register(
            RouteSpec::get("/users/history")
                .summary("The calling user's request history")
                .responds(StatusCode::OK, "Page of history entries"),
            get_my_history,
        )?
        .register(
            RouteSpec::get("/users/{user_id}")
                .summary("Gets a user")
                .require(Role::Admin)
                .responds(StatusCode::OK, "User")
                .responds(StatusCode::NOT_FOUND, "User not found"),
            get_user,
        )?
        .register(
            RouteSpec::get("/users/{user_id}/history")
                .summary("A user's request history")
                .require(Role::Admin)
                .responds(StatusCode::OK, "Page of history entries")
                .responds(StatusCode::NOT_FOUND, "User not found"),
            get_user_history,
        )?;

    Ok(())
}

async fn list_users(
    state: AppState,
    _caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<Page<User>>> {
    let params: PageParams = request.query()?;
    let conn = state.db.connect().map_err(AppError::from)?;

    let users = User::list(&conn, params.limit(), params.offset()).await?;
    let total = User::count(&conn).await?;

    Ok(Json(Page::new(users, total, params)))
}

async fn find_user(state: &AppState, user_id: &str) -> AppResult<User> {
    let conn = state.db.connect().map_err(AppError::from)?;
    User::find_by_id(&conn, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

async fn get_me(
    state: AppState,
    caller: CallerIdentity,
    _request: RawRequest,
) -> AppResult<Json<User>> {
    Ok(Json(find_user(&state, &caller.id).await?))
}

async fn get_user(
    state: AppState,
    _caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<User>> {
    let user_id: String = request.path().await?;
    Ok(Json(find_user(&state, &user_id).await?))
}

async fn history_page(
    state: &AppState,
    user_id: &str,
    request: &RawRequest,
) -> AppResult<Page<UserHistory>> {
    let params: PageParams = request.query()?;
    let filter: HistoryFilter = request.query()?;

    let conn = state.db.connect().map_err(AppError::from)?;
    let items =
        UserHistory::list(&conn, Some(user_id), &filter, params.limit(), params.offset()).await?;
    let total = UserHistory::count(&conn, Some(user_id), &filter).await?;

    Ok(Page::new(items, total, params))
}

async fn get_my_history(
    state: AppState,
    caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<Page<UserHistory>>> {
    Ok(Json(history_page(&state, &caller.id, &request).await?))
}

async fn get_user_history(
    state: AppState,
    _caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<Page<UserHistory>>> {
    let user_id: String = request.path().await?;
    let user = find_user(&state, &user_id).await?;
    Ok(Json(history_page(&state, &user.id, &request).await?))
}
