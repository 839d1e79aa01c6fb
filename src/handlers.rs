use actix_web::http::header;
use actix_web::web::{Data, Form, Json};
use actix_web::{HttpResponse, web};
use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;

use crate::auth::{SESSION_TIMEOUT, SessionUser, clear_cookie, create_token, session_cookie};
use crate::cache::FileCache;
use crate::config::Config;
use crate::error::AppError;
use crate::middleware::Authorization;
use crate::models::{
    Bug, DeleteBugRequest, DeleteUserRequest, LoginForm, Project, ROLE_ADMIN, ROLE_MANAGER,
    ROLE_USER, STATUS_CLOSED, SaveBugForm, SaveProjectForm, SaveUserForm,
    UpdateUserProjectRequest, User, parse_opt_date, timestamp_now,
};

const SERVICE_BANNER: &str = "Bug Tracker";

const MAX_CREDENTIAL_LEN: usize = 255;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/login").route(web::post().to(login)))
        .service(web::resource("/logout").route(web::get().to(logout)))
        .service(web::resource("/refresh-session").route(web::post().to(refresh_session)))
        .service(
            web::scope("/admin")
                .wrap(Authorization)
                .service(web::resource("").route(web::get().to(admin_page)))
                .service(web::resource("/saveUser").route(web::post().to(save_user)))
                .service(web::resource("/deleteUser").route(web::post().to(delete_user)))
                .service(web::resource("/saveProject").route(web::post().to(save_project)))
                .service(web::resource("/saveBug").route(web::post().to(admin_save_bug)))
                .service(web::resource("/deleteBug").route(web::post().to(delete_bug)))
                .service(
                    web::resource("/updateUserProject")
                        .route(web::post().to(update_user_project)),
                ),
        )
        .service(
            web::scope("/bug")
                .wrap(Authorization)
                .service(web::resource("").route(web::get().to(bug_page)))
                .service(web::resource("/saveBug").route(web::post().to(user_save_bug))),
        );
}

// === GET / ===
async fn index(user: Option<SessionUser>) -> HttpResponse {
    match user {
        Some(user) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": SERVICE_BANNER,
            "loggedIn": true,
            "role": user.role,
        })),
        None => HttpResponse::Ok().json(json!({
            "success": true,
            "message": SERVICE_BANNER,
            "loggedIn": false,
        })),
    }
}

// === POST /login ===
async fn login(
    pool: Data<SqlitePool>,
    config: Data<Config>,
    form: Form<LoginForm>,
) -> Result<HttpResponse, AppError> {
    if form.username.is_empty()
        || form.password.is_empty()
        || form.username.len() > MAX_CREDENTIAL_LEN
        || form.password.len() > MAX_CREDENTIAL_LEN
    {
        return Err(AppError::Validation(
            "Username and password are required".into(),
        ));
    }

    // A missing user and a wrong password produce the same message.
    let user = User::find_by_username(&pool, &form.username)
        .await?
        .ok_or(AppError::InvalidCredentials)?;
    if !verify(&form.password, &user.password).unwrap_or(false) {
        return Err(AppError::InvalidCredentials);
    }

    let token = create_token(&config.session_key, user.id, user.role_id)?;
    log::info!("User logged in. id={} role={}", user.id, user.role_id);

    let redirect = if user.role_id <= ROLE_MANAGER {
        "/admin"
    } else {
        "/bug"
    };

    Ok(HttpResponse::Ok().cookie(session_cookie(token)).json(json!({
        "success": true,
        "redirect": redirect,
    })))
}

// === GET /logout ===
async fn logout(user: Option<SessionUser>) -> HttpResponse {
    if let Some(user) = user {
        log::info!("User logged out. id={}", user.user_id);
    }
    HttpResponse::Found()
        .append_header((header::LOCATION, "/"))
        .cookie(clear_cookie())
        .finish()
}

// === POST /refresh-session ===
async fn refresh_session(
    config: Data<Config>,
    user: Option<SessionUser>,
) -> Result<HttpResponse, AppError> {
    let Some(user) = user else {
        return Ok(HttpResponse::Ok().json(json!({ "success": false })));
    };

    let token = create_token(&config.session_key, user.user_id, user.role)?;
    let new_expiration = Utc::now().timestamp() + SESSION_TIMEOUT;
    Ok(HttpResponse::Ok().cookie(session_cookie(token)).json(json!({
        "success": true,
        "newExpirationTime": new_expiration,
    })))
}

// === GET /admin ===
async fn admin_page(pool: Data<SqlitePool>, user: SessionUser) -> Result<HttpResponse, AppError> {
    if !user.can_manage() {
        return Err(AppError::Forbidden);
    }

    let projects = Project::find_all(&pool).await?;
    let bugs = Bug::find_all(&pool).await?;
    let now = Utc::now().naive_utc();
    let open: Vec<&Bug> = bugs.iter().filter(|b| b.is_open()).collect();
    let overdue: Vec<&Bug> = bugs.iter().filter(|b| b.is_overdue(now)).collect();
    let unassigned: Vec<&Bug> = bugs.iter().filter(|b| b.is_unassigned()).collect();

    // The user list is admin-only; managers get the rest of the page.
    let users = if user.is_admin() {
        Some(User::find_all(&pool).await?)
    } else {
        None
    };

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "projects": projects,
        "bugs": bugs,
        "openBugs": open,
        "overdueBugs": overdue,
        "unassignedBugs": unassigned,
        "users": users,
    })))
}

// === GET /bug ===
async fn bug_page(pool: Data<SqlitePool>, user: SessionUser) -> Result<HttpResponse, AppError> {
    let projects = Project::find_all(&pool).await?;
    let users = User::find_all(&pool).await?;

    let bugs = if user.can_manage() {
        Bug::find_all(&pool).await?
    } else {
        let record = User::find_by_id(&pool, user.user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;
        match record.project_id {
            Some(project_id) => Bug::find_by_project(&pool, project_id).await?,
            None => Vec::new(),
        }
    };

    let now = Utc::now().naive_utc();
    let open: Vec<&Bug> = bugs.iter().filter(|b| b.is_open()).collect();
    let overdue: Vec<&Bug> = bugs.iter().filter(|b| b.is_overdue(now)).collect();

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "projects": projects,
        "users": users,
        "bugs": bugs,
        "openBugs": open,
        "overdueBugs": overdue,
    })))
}

// === POST /admin/saveUser ===
async fn save_user(
    pool: Data<SqlitePool>,
    user: SessionUser,
    form: Form<SaveUserForm>,
) -> Result<HttpResponse, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden);
    }
    form.validate()?;

    if let Some(existing) = User::find_by_username(&pool, &form.username).await? {
        if Some(existing.id) != form.user_id {
            return Err(AppError::Conflict("Username already exists".into()));
        }
    }

    let user_id = match form.user_id {
        Some(id) => {
            let rows = User::update(
                &pool,
                id,
                &form.username,
                form.role_id,
                form.project_id,
                &form.name,
            )
            .await?;
            if rows == 0 {
                return Err(AppError::NotFound("User not found".into()));
            }
            if !form.password.is_empty() {
                let hashed = hash(&form.password, DEFAULT_COST)?;
                User::update_password(&pool, id, &hashed).await?;
            }
            id
        }
        None => {
            if form.password.is_empty() {
                return Err(AppError::Validation(
                    "Password is required for new users".into(),
                ));
            }
            let hashed = hash(&form.password, DEFAULT_COST)?;
            User::insert(
                &pool,
                &form.username,
                form.role_id,
                form.project_id,
                &hashed,
                &form.name,
            )
            .await?
        }
    };

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "User saved successfully",
        "userId": user_id,
    })))
}

// === POST /admin/deleteUser ===
async fn delete_user(
    pool: Data<SqlitePool>,
    cache: Data<FileCache>,
    user: SessionUser,
    body: Json<DeleteUserRequest>,
) -> Result<HttpResponse, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden);
    }

    let target = User::find_by_id(&pool, body.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    // The system must never lose its last admin or manager.
    if target.role_id == ROLE_ADMIN && User::count_by_role(&pool, ROLE_ADMIN).await? <= 1 {
        return Err(AppError::Conflict("Cannot delete the last admin".into()));
    }
    if target.role_id == ROLE_MANAGER && User::count_by_role(&pool, ROLE_MANAGER).await? <= 1 {
        return Err(AppError::Conflict("Cannot delete the last manager".into()));
    }

    Bug::unassign_user(&pool, &cache, target.id).await?;
    Bug::reassign_owned_to_manager(&pool, &cache, target.id).await?;
    User::delete(&pool, target.id).await?;
    log::info!("User deleted. id={} by admin={}", target.id, user.user_id);

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "User deleted successfully",
    })))
}

// === POST /admin/saveProject ===
async fn save_project(
    pool: Data<SqlitePool>,
    user: SessionUser,
    form: Form<SaveProjectForm>,
) -> Result<HttpResponse, AppError> {
    if !user.can_manage() {
        return Err(AppError::Forbidden);
    }
    form.validate()?;

    let project_id = match form.project_id {
        Some(id) => {
            let rows = Project::update(&pool, id, &form.project_name).await?;
            if rows == 0 {
                return Err(AppError::NotFound("Project not found".into()));
            }
            id
        }
        None => Project::insert(&pool, &form.project_name).await?,
    };

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Project saved successfully",
        "projectId": project_id,
    })))
}

/// Shared save path for the admin and user bug endpoints. New bugs are
/// stamped with the session user as owner and the current time as
/// date_raised; closing stamps date_closed, any other status clears it.
async fn persist_bug(
    pool: &SqlitePool,
    cache: &FileCache,
    session: SessionUser,
    form: &SaveBugForm,
) -> Result<i64, AppError> {
    form.validate()?;
    if Project::find_by_id(pool, form.project_id).await?.is_none() {
        return Err(AppError::Validation("Invalid input data".into()));
    }
    let target_date = parse_opt_date(form.target_date.as_deref())?;
    let now = timestamp_now();
    let fix_description = form.fix_description.clone().filter(|s| !s.is_empty());

    match form.bug_id {
        Some(id) => {
            let existing = Bug::find_by_id_cached(pool, cache, id)
                .await?
                .ok_or_else(|| AppError::NotFound("Bug not found".into()))?;
            let date_closed = if form.status_id == STATUS_CLOSED {
                existing.date_closed.or(Some(now))
            } else {
                None
            };
            let bug = Bug {
                id,
                project_id: form.project_id,
                owner_id: existing.owner_id,
                assigned_to_id: form.assigned_to_id,
                status_id: form.status_id,
                priority_id: form.priority_id,
                summary: form.summary.clone(),
                description: form.description.clone(),
                fix_description,
                date_raised: existing.date_raised,
                target_date,
                date_closed,
            };
            Bug::update(pool, &bug).await?;
            Bug::invalidate_cache(cache, id);
            Ok(id)
        }
        None => {
            let bug = Bug {
                id: 0,
                project_id: form.project_id,
                owner_id: session.user_id,
                assigned_to_id: form.assigned_to_id,
                status_id: form.status_id,
                priority_id: form.priority_id,
                summary: form.summary.clone(),
                description: form.description.clone(),
                fix_description,
                date_raised: now,
                target_date,
                date_closed: (form.status_id == STATUS_CLOSED).then_some(now),
            };
            Bug::insert(pool, &bug).await
        }
    }
}

// === POST /admin/saveBug ===
async fn admin_save_bug(
    pool: Data<SqlitePool>,
    cache: Data<FileCache>,
    user: SessionUser,
    form: Form<SaveBugForm>,
) -> Result<HttpResponse, AppError> {
    if !user.can_manage() {
        return Err(AppError::Forbidden);
    }
    let bug_id = persist_bug(&pool, &cache, user, &form).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Bug saved successfully",
        "bugId": bug_id,
    })))
}

// === POST /bug/saveBug ===
async fn user_save_bug(
    pool: Data<SqlitePool>,
    cache: Data<FileCache>,
    user: SessionUser,
    form: Form<SaveBugForm>,
) -> Result<HttpResponse, AppError> {
    if user.role == ROLE_USER {
        let record = User::find_by_id(&pool, user.user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;
        match form.bug_id {
            // Plain users may only edit bugs assigned to them.
            Some(id) => {
                let existing = Bug::find_by_id_cached(&pool, &cache, id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Bug not found".into()))?;
                if existing.assigned_to_id != Some(user.user_id) {
                    return Err(AppError::Forbidden);
                }
            }
            // New bugs must land in the user's own project.
            None => {
                if record.project_id != Some(form.project_id) {
                    return Err(AppError::Forbidden);
                }
            }
        }
    }

    let bug_id = persist_bug(&pool, &cache, user, &form).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Bug saved successfully",
        "bugId": bug_id,
    })))
}

// === POST /admin/deleteBug ===
async fn delete_bug(
    pool: Data<SqlitePool>,
    cache: Data<FileCache>,
    user: SessionUser,
    body: Json<DeleteBugRequest>,
) -> Result<HttpResponse, AppError> {
    if !user.can_manage() {
        return Err(AppError::Forbidden);
    }

    let rows = Bug::delete(&pool, body.bug_id).await?;
    if rows == 0 {
        return Err(AppError::NotFound("Bug not found".into()));
    }
    Bug::invalidate_cache(&cache, body.bug_id);

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Bug deleted successfully",
    })))
}

// === POST /admin/updateUserProject ===
async fn update_user_project(
    pool: Data<SqlitePool>,
    user: SessionUser,
    body: Json<UpdateUserProjectRequest>,
) -> Result<HttpResponse, AppError> {
    if !user.can_manage() {
        return Err(AppError::Forbidden);
    }

    let rows = User::update_project(&pool, body.user_id, body.project_id).await?;
    if rows == 0 {
        return Err(AppError::NotFound("User not found".into()));
    }

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "User project updated successfully",
    })))
}
