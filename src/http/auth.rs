use axum::extract::State;
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{record_audit, sign_token, AppState, ClientMeta, SessionAuth, SESSION_COOKIE};
use crate::error::PortalError;
use crate::session::SessionUser;
use crate::store::audit::{AuditStatus, NewAuditRecord};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Self-service account creation. New accounts are never admins; the first
/// admin comes from the bootstrap path.
pub async fn register(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, PortalError> {
    let username = req.username.trim();
    let email = req.email.trim();
    if username.len() < 3 {
        return Err(PortalError::Validation(
            "username must be at least 3 characters".into(),
        ));
    }
    if !email.contains('@') || email.contains(char::is_whitespace) {
        return Err(PortalError::Validation("invalid email address".into()));
    }
    if req.password.len() < 6 {
        return Err(PortalError::Validation(
            "password must be at least 6 characters".into(),
        ));
    }
    if state.users.find_by_username(username)?.is_some() {
        return Err(PortalError::Validation("username already exists".into()));
    }
    if state.users.find_by_email(email)?.is_some() {
        return Err(PortalError::Validation("email already registered".into()));
    }

    let user = state
        .users
        .create(username, email, &state.verifier.hash(&req.password), false)?;
    info!(username = %user.username, "user registered");

    record_audit(
        &state,
        &NewAuditRecord {
            user_id: Some(user.id),
            username: Some(&user.username),
            action: "register",
            resource_type: "authentication",
            resource_name: "user_account",
            namespace: "system",
            cluster_alias: "system",
            status: AuditStatus::Success,
            command: &format!("user {} registered", user.username),
            output: "user account created",
            source_ip: meta.source_ip(),
            user_agent: meta.user_agent(),
        },
    );
    Ok(Json(serde_json::json!({
        "success": true,
        "username": user.username,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
    pub is_admin: bool,
}

pub async fn login(
    State(state): State<AppState>,
    meta: ClientMeta,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), PortalError> {
    let username = req.username.trim();
    let user = state.users.find_by_username(username)?;

    let verified = user
        .as_ref()
        .map(|u| state.verifier.verify(&req.password, &u.password_hash))
        .unwrap_or(false);

    if !verified {
        // Failed attempts are audited with no user id — the caller was never
        // authenticated.
        record_audit(
            &state,
            &NewAuditRecord {
                user_id: None,
                username: None,
                action: "login_failed",
                resource_type: "authentication",
                resource_name: "user_session",
                namespace: "system",
                cluster_alias: "system",
                status: AuditStatus::Failed,
                command: &format!("failed login attempt for username: {username}"),
                output: "invalid username or password",
                source_ip: meta.source_ip(),
                user_agent: meta.user_agent(),
            },
        );
        return Err(PortalError::Unauthorized);
    }

    let user = user.ok_or(PortalError::Unauthorized)?;
    state.users.touch_last_login(user.id)?;
    let token = state.sessions.create(SessionUser {
        user_id: user.id,
        username: user.username.clone(),
        is_admin: user.is_admin,
    })?;
    info!(username = %user.username, "login");

    record_audit(
        &state,
        &NewAuditRecord {
            user_id: Some(user.id),
            username: Some(&user.username),
            action: "login",
            resource_type: "authentication",
            resource_name: "user_session",
            namespace: "system",
            cluster_alias: "system",
            status: AuditStatus::Success,
            command: &format!("user {} logged in", user.username),
            output: "login successful",
            source_ip: meta.source_ip(),
            user_agent: meta.user_agent(),
        },
    );

    let signed = sign_token(&state.config.session_secret, token);
    let jar = jar.add(
        Cookie::build((SESSION_COOKIE, signed.clone()))
            .path("/")
            .http_only(true),
    );
    Ok((
        jar,
        Json(LoginResponse {
            token: signed,
            username: user.username,
            is_admin: user.is_admin,
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: SessionAuth,
    meta: ClientMeta,
    jar: CookieJar,
) -> Result<(CookieJar, Json<serde_json::Value>), PortalError> {
    let connected_alias = state.sessions.remove(auth.token)?;
    record_audit(
        &state,
        &NewAuditRecord {
            user_id: Some(auth.user.user_id),
            username: Some(&auth.user.username),
            action: "logout",
            resource_type: "authentication",
            resource_name: "user_session",
            namespace: "system",
            cluster_alias: connected_alias.as_deref().unwrap_or("system"),
            status: AuditStatus::Success,
            command: &format!("user {} logged out", auth.user.username),
            output: "logout successful",
            source_ip: meta.source_ip(),
            user_agent: meta.user_agent(),
        },
    );
    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/"));
    Ok((jar, Json(serde_json::json!({ "success": true }))))
}
