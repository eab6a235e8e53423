//! Authentication service: register, login, refresh, logout and the
//! account self-service flows, wiring the password module, token issuer,
//! session store and revocation store together.

use std::time::Duration;

use serde_json::json;
use sha2::{Digest, Sha256};
use storefront_core::audit::{AuditContext, AuditEntry, actions, resources};
use storefront_core::auth::jwt::{mint_refresh, random_token};
use storefront_core::auth::password::Verification;
use storefront_core::models::auth::{NewPrincipal, Principal, normalize_email};
use storefront_core::store::StoreError;
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::error::{AppError, AppResult, INVALID_CREDENTIALS};
use crate::middleware::auth::AuthContext;
use crate::models::{
    DeleteAccountRequest, FederatedLoginRequest, MessageResponse, RefreshResponse,
    RegisterRequest, SessionsResponse, TokenResponse, UserSummary,
};

/// Shortest accepted password.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Lifetime of a password-reset token.
pub const RESET_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

const RESET_TOKEN_PREFIX: &str = "reset_token:";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_email(email: &str) -> AppResult<()> {
    let valid = email.len() <= 254
        && !email.chars().any(char::is_whitespace)
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation("Email invalide".into()))
    }
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Le mot de passe doit contenir au moins {MIN_PASSWORD_LEN} caractères"
        )));
    }
    Ok(())
}

fn reset_key(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{RESET_TOKEN_PREFIX}{:x}", hasher.finalize())
}

/// Hash off the async workers.
async fn hash_password(state: &AppState, plaintext: &str) -> AppResult<String> {
    let hasher = state.hasher;
    let plaintext = plaintext.to_owned();
    tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
        .await
        .map_err(|e| AppError::Internal(format!("hash task: {e}")))?
        .map_err(AppError::from)
}

/// Verify off the async workers. A corrupt stored hash is logged and
/// reported as a mismatch. Without a principal or a stored hash the same
/// derivation cost is paid against a decoy, so timing does not reveal
/// which accounts exist.
async fn verify_password(
    state: &AppState,
    principal: Option<&Principal>,
    plaintext: &str,
) -> AppResult<Verification> {
    let encoded = principal.and_then(|p| p.password_hash.clone());
    let hasher = state.hasher;
    let plaintext = plaintext.to_owned();
    let result = tokio::task::spawn_blocking(move || match encoded {
        Some(encoded) => hasher.verify(&plaintext, &encoded),
        None => hasher.verify_absent(&plaintext),
    })
    .await
    .map_err(|e| AppError::Internal(format!("verify task: {e}")))?;
    match result {
        Ok(verification) => Ok(verification),
        Err(e) => {
            error!(user_id = ?principal.map(|p| &p.id), error = %e, "stored credential unusable");
            Ok(Verification {
                matched: false,
                needs_rehash: false,
            })
        }
    }
}

/// Mint an access/refresh pair and store the refresh token in the slot.
async fn issue_session(
    state: &AppState,
    principal: &Principal,
    device_id: Option<&str>,
) -> AppResult<TokenResponse> {
    let access = state.issuer.mint_access(
        &principal.id,
        &principal.email,
        &principal.role,
        principal.is_company_admin,
    )?;
    let refresh_token = mint_refresh();
    state
        .sessions
        .put(&principal.id, device_id, &refresh_token, state.config.refresh_ttl)
        .await?;
    Ok(TokenResponse {
        access_token: access.token,
        refresh_token,
        expires_in: state.issuer.access_ttl().as_secs(),
        token_type: "Bearer",
        user: UserSummary::from(principal),
    })
}

async fn load_principal(state: &AppState, user_id: &str) -> AppResult<Principal> {
    state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Utilisateur introuvable".into()))
}

/// Blacklist the caller's access token for the rest of its lifetime.
async fn revoke_current_token(state: &AppState, auth: &AuthContext) -> AppResult<()> {
    state
        .revocation
        .blacklist(&auth.token_id, auth.remaining_lifetime())
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Public auth operations
// ---------------------------------------------------------------------------

/// Create a local account and sign it in.
pub async fn register(
    state: &AppState,
    ctx: &AuditContext,
    device_id: Option<&str>,
    req: RegisterRequest,
) -> AppResult<TokenResponse> {
    let email = normalize_email(&req.email);
    validate_email(&email)?;
    validate_password(&req.password)?;
    let name = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let hash = hash_password(state, &req.password).await?;
    let principal = match state
        .users
        .create_principal(NewPrincipal::local(&email, name, hash))
        .await
    {
        Ok(p) => p,
        Err(StoreError::Conflict(_)) => {
            return Err(AppError::Conflict("Cet email est déjà utilisé".into()));
        }
        Err(e) => return Err(e.into()),
    };

    info!(user_id = %principal.id, "account registered");
    state.audit.log(
        &ctx.for_user(&principal.id, &principal.email),
        AuditEntry::new(actions::USER_CREATE, resources::USER)
            .resource_id(principal.id.as_str())
            .new_value(json!({ "email": principal.email, "provider": principal.provider })),
    );
    issue_session(state, &principal, device_id).await
}

/// Authenticate with email and password.
///
/// Unknown email, missing credential and wrong password all answer the same
/// 401. A match on a legacy or outdated hash upgrades it in place.
pub async fn login(
    state: &AppState,
    ctx: &AuditContext,
    device_id: Option<&str>,
    email: &str,
    password: &str,
) -> AppResult<TokenResponse> {
    let email = normalize_email(email);
    let failed = |reason: &str| {
        debug!(email = %email, reason, "login failed");
        let mut ctx = ctx.clone();
        ctx.email = Some(email.clone());
        state.audit.log_failure(
            &ctx,
            AuditEntry::new(actions::LOGIN_FAILED, resources::AUTH),
            reason,
        );
        AppError::unauthorized(INVALID_CREDENTIALS)
    };

    let found = state.users.find_by_email(&email).await?;
    let verification = verify_password(state, found.as_ref(), password).await?;
    let Some(principal) = found else {
        return Err(failed("unknown email"));
    };
    if !verification.matched {
        return Err(failed("bad password"));
    }

    if verification.needs_rehash {
        match hash_password(state, password).await {
            Ok(hash) => {
                if let Err(e) = state.users.update_password_hash(&principal.id, &hash).await {
                    warn!(user_id = %principal.id, error = %e, "could not persist rehashed credential");
                } else {
                    info!(user_id = %principal.id, "credential rehashed");
                }
            }
            Err(e) => warn!(user_id = %principal.id, error = %e, "rehash failed"),
        }
    }

    if state.revocation.is_banned(&principal.id).await? {
        return Err(failed("account banned"));
    }

    state.audit.log(
        &ctx.for_user(&principal.id, &principal.email),
        AuditEntry::new(actions::LOGIN_SUCCESS, resources::AUTH),
    );
    issue_session(state, &principal, device_id).await
}

/// Sign in an identity already verified by an external provider, creating
/// the principal on first sight.
pub async fn login_federated(
    state: &AppState,
    ctx: &AuditContext,
    device_id: Option<&str>,
    req: FederatedLoginRequest,
) -> AppResult<TokenResponse> {
    if req.provider.is_empty() || req.provider_id.is_empty() {
        return Err(AppError::Validation("Identité fédérée incomplète".into()));
    }
    if req.provider == storefront_core::models::auth::LOCAL_PROVIDER {
        return Err(AppError::Validation("Fournisseur d'identité invalide".into()));
    }
    let email = normalize_email(&req.email);

    let principal = match state
        .users
        .find_by_provider(&req.provider, &req.provider_id)
        .await?
    {
        Some(p) => p,
        None => {
            if state.users.find_by_email(&email).await?.is_some() {
                return Err(AppError::Conflict(
                    "Cet email est déjà associé à un autre compte".into(),
                ));
            }
            let mut new = NewPrincipal::local(&email, req.name.as_deref(), String::new());
            new.provider = req.provider.clone();
            new.provider_id = Some(req.provider_id.clone());
            new.password_hash = None;
            let principal = state.users.create_principal(new).await?;
            info!(user_id = %principal.id, provider = %principal.provider, "federated account created");
            state.audit.log(
                &ctx.for_user(&principal.id, &principal.email),
                AuditEntry::new(actions::USER_CREATE, resources::USER)
                    .resource_id(principal.id.as_str())
                    .new_value(json!({ "email": principal.email, "provider": principal.provider })),
            );
            principal
        }
    };

    if state.revocation.is_banned(&principal.id).await? {
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    }
    state.audit.log(
        &ctx.for_user(&principal.id, &principal.email),
        AuditEntry::new(actions::LOGIN_SUCCESS, resources::AUTH)
            .new_value(json!({ "provider": principal.provider })),
    );
    issue_session(state, &principal, device_id).await
}

/// Exchange a refresh token for a new access token.
///
/// The presented access token may be expired; it only names the user. A
/// missing or mismatched refresh token gets the same 401.
pub async fn refresh(
    state: &AppState,
    ctx: &AuditContext,
    device_id: Option<&str>,
    access_token: Option<&str>,
    refresh_token: &str,
) -> AppResult<RefreshResponse> {
    let access_token = access_token.ok_or_else(|| AppError::unauthorized("Token manquant"))?;
    let claims = state
        .issuer
        .parse_access_allow_expired(access_token)
        .map_err(|e| {
            debug!(reason = %e, "refresh with unusable access token");
            AppError::unauthorized("Token invalide")
        })?;

    if state.revocation.is_banned(&claims.user_id).await? {
        return Err(AppError::unauthorized("Token révoqué"));
    }
    if !state
        .sessions
        .matches(&claims.user_id, device_id, refresh_token)
        .await?
    {
        debug!(user_id = %claims.user_id, device = ?device_id, "refresh token not recognised");
        return Err(AppError::unauthorized("Refresh token invalide"));
    }

    let principal = state
        .users
        .find_by_id(&claims.user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("Refresh token invalide"))?;
    let access = state.issuer.mint_access(
        &principal.id,
        &principal.email,
        &principal.role,
        principal.is_company_admin,
    )?;

    let rotated = if state.config.rotate_refresh_tokens {
        let next = mint_refresh();
        state
            .sessions
            .put(&principal.id, device_id, &next, state.config.refresh_ttl)
            .await?;
        Some(next)
    } else {
        None
    };

    state.audit.log(
        &ctx.for_user(&principal.id, &principal.email),
        AuditEntry::new(actions::REFRESH, resources::AUTH)
            .new_value(json!({ "rotated": rotated.is_some() })),
    );
    Ok(RefreshResponse {
        access_token: access.token,
        refresh_token: rotated,
        expires_in: state.issuer.access_ttl().as_secs(),
        token_type: "Bearer",
    })
}

/// Drop the device's refresh token (or all of them) and blacklist the
/// current access token. Completes before the response is sent, so a
/// following refresh already fails.
pub async fn logout(
    state: &AppState,
    ctx: &AuditContext,
    auth: &AuthContext,
    device_id: Option<&str>,
    logout_all: bool,
) -> AppResult<MessageResponse> {
    if logout_all {
        state.sessions.delete_all(&auth.user_id).await?;
    } else {
        state.sessions.delete(&auth.user_id, device_id).await?;
    }
    revoke_current_token(state, auth).await?;

    state.audit.log(
        ctx,
        AuditEntry::new(actions::LOGOUT, resources::AUTH)
            .new_value(json!({ "logout_all": logout_all })),
    );
    Ok(MessageResponse::new(if logout_all {
        "Déconnecté de tous les appareils"
    } else {
        "Déconnexion réussie"
    }))
}

pub async fn me(state: &AppState, auth: &AuthContext) -> AppResult<UserSummary> {
    let principal = load_principal(state, &auth.user_id).await?;
    Ok(UserSummary::from(&principal))
}

/// Replace the caller's password and end every session.
pub async fn change_password(
    state: &AppState,
    ctx: &AuditContext,
    auth: &AuthContext,
    old: &str,
    new: &str,
) -> AppResult<MessageResponse> {
    validate_password(new)?;
    let principal = load_principal(state, &auth.user_id).await?;
    if !principal.is_local() {
        return Err(AppError::Validation(
            "Ce compte n'utilise pas de mot de passe".into(),
        ));
    }
    if !verify_password(state, Some(&principal), old).await?.matched {
        state.audit.log_failure(
            ctx,
            AuditEntry::new(actions::PASSWORD_CHANGE, resources::USER)
                .resource_id(principal.id.as_str()),
            "bad current password",
        );
        return Err(AppError::unauthorized("Mot de passe actuel incorrect"));
    }

    let hash = hash_password(state, new).await?;
    state.users.update_password_hash(&principal.id, &hash).await?;
    let removed = state.sessions.delete_all(&principal.id).await?;
    revoke_current_token(state, auth).await?;

    info!(user_id = %principal.id, removed, "password changed, sessions revoked");
    state.audit.log(
        ctx,
        AuditEntry::new(actions::PASSWORD_CHANGE, resources::USER)
            .resource_id(principal.id.as_str()),
    );
    Ok(MessageResponse::new(
        "Mot de passe modifié. Veuillez vous reconnecter",
    ))
}

/// Start a password reset. Answers the same whether or not the account
/// exists.
pub async fn forgot_password(
    state: &AppState,
    ctx: &AuditContext,
    email: &str,
) -> AppResult<MessageResponse> {
    const ANSWER: &str = "Si un compte existe pour cet email, un lien de réinitialisation a été envoyé";

    let email = normalize_email(email);
    match state.users.find_by_email(&email).await {
        Ok(Some(principal)) if principal.is_local() => {
            let token = random_token(32);
            if let Err(e) = state
                .kv
                .set(&reset_key(&token), &principal.id, Some(RESET_TOKEN_TTL))
                .await
            {
                warn!(user_id = %principal.id, error = %e, "could not store reset token");
                return Ok(MessageResponse::new(ANSWER));
            }

            let link = format!("{}/reset-password?token={token}", state.config.frontend_url);
            let mailer = state.mailer.clone();
            let to = principal.email.clone();
            tokio::spawn(async move {
                if let Err(e) = mailer.send_password_reset(&to, &link).await {
                    warn!(error = %e, "password reset mail not sent");
                }
            });
            state.audit.log(
                &ctx.for_user(&principal.id, &principal.email),
                AuditEntry::new(actions::PASSWORD_RESET, resources::USER)
                    .resource_id(principal.id.as_str())
                    .new_value(json!({ "stage": "requested" })),
            );
        }
        Ok(_) => debug!(email = %email, "reset requested for unknown or federated account"),
        Err(e) => warn!(error = %e, "reset lookup failed"),
    }
    Ok(MessageResponse::new(ANSWER))
}

/// Consume a reset token, set the new password and end every session.
pub async fn reset_password(
    state: &AppState,
    ctx: &AuditContext,
    token: &str,
    new: &str,
) -> AppResult<MessageResponse> {
    validate_password(new)?;
    let key = reset_key(token);
    let invalid = || AppError::unauthorized("Token invalide ou expiré");

    let user_id = state.kv.get(&key).await?.ok_or_else(invalid)?;
    // Single use: whoever deletes the key owns the reset.
    if !state.kv.del(&key).await? {
        return Err(invalid());
    }

    let hash = hash_password(state, new).await?;
    match state.users.update_password_hash(&user_id, &hash).await {
        Ok(()) => {}
        Err(StoreError::NotFound(_)) => return Err(invalid()),
        Err(e) => return Err(e.into()),
    }
    let removed = state.sessions.delete_all(&user_id).await?;

    info!(user_id = %user_id, removed, "password reset, sessions revoked");
    let mut ctx = ctx.clone();
    ctx.user_id = Some(user_id.clone());
    state.audit.log(
        &ctx,
        AuditEntry::new(actions::PASSWORD_RESET, resources::USER)
            .resource_id(user_id.as_str())
            .new_value(json!({ "stage": "completed" })),
    );
    Ok(MessageResponse::new("Mot de passe réinitialisé"))
}

/// Delete the caller's account.
///
/// Sessions are revoked and the id banned before the purge starts, so no
/// concurrent request keeps acting under the identity.
pub async fn delete_account(
    state: &AppState,
    ctx: &AuditContext,
    auth: &AuthContext,
    req: DeleteAccountRequest,
) -> AppResult<MessageResponse> {
    let principal = load_principal(state, &auth.user_id).await?;
    if principal.is_local() {
        let password = req
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::Validation("Mot de passe requis".into()))?;
        if !verify_password(state, Some(&principal), password).await?.matched {
            state.audit.log_failure(
                ctx,
                AuditEntry::new(actions::USER_DELETE, resources::USER)
                    .resource_id(principal.id.as_str()),
                "bad password",
            );
            return Err(AppError::unauthorized("Mot de passe incorrect"));
        }
    } else if !req.confirm_deletion {
        return Err(AppError::Validation(
            "Confirmation de suppression requise".into(),
        ));
    }

    state.sessions.delete_all(&principal.id).await?;
    state.revocation.ban(&principal.id).await?;
    revoke_current_token(state, auth).await?;

    state.audit.log(
        ctx,
        AuditEntry::new(actions::USER_DELETE, resources::USER)
            .resource_id(principal.id.as_str())
            .old_value(json!({ "email": principal.email, "provider": principal.provider })),
    );

    let purger = state.purger.clone();
    let user_id = principal.id.clone();
    tokio::spawn(async move {
        if let Err(e) = purger.purge(&user_id).await {
            error!(user_id = %user_id, error = %e, "account purge failed");
        }
    });
    Ok(MessageResponse::new("Compte supprimé"))
}

pub async fn list_sessions(state: &AppState, auth: &AuthContext) -> AppResult<SessionsResponse> {
    let sessions = state.sessions.list_devices(&auth.user_id).await?;
    Ok(SessionsResponse {
        count: sessions.len(),
        sessions,
    })
}

// ---------------------------------------------------------------------------
// Administrative actions
// ---------------------------------------------------------------------------

/// Ban a user and end every session. Tokens already issued are rejected by
/// the auth pipeline from the next request on.
pub async fn ban_user(state: &AppState, ctx: &AuditContext, user_id: &str) -> AppResult<MessageResponse> {
    load_principal(state, user_id).await?;
    state.revocation.ban(user_id).await?;
    let removed = state.sessions.delete_all(user_id).await?;
    state.audit.log(
        ctx,
        AuditEntry::new(actions::USER_BAN, resources::USER)
            .resource_id(user_id)
            .new_value(json!({ "sessions_removed": removed })),
    );
    Ok(MessageResponse::new("Utilisateur banni"))
}

pub async fn unban_user(state: &AppState, ctx: &AuditContext, user_id: &str) -> AppResult<MessageResponse> {
    state.revocation.unban(user_id).await?;
    state.audit.log(
        ctx,
        AuditEntry::new(actions::USER_UNBAN, resources::USER).resource_id(user_id),
    );
    Ok(MessageResponse::new("Utilisateur débanni"))
}

/// End every session of a user without banning.
pub async fn revoke_sessions(
    state: &AppState,
    ctx: &AuditContext,
    user_id: &str,
) -> AppResult<MessageResponse> {
    let removed = state.sessions.delete_all(user_id).await?;
    state.audit.log(
        ctx,
        AuditEntry::new(actions::SESSIONS_REVOKE, resources::USER)
            .resource_id(user_id)
            .new_value(json!({ "sessions_removed": removed })),
    );
    Ok(MessageResponse::new("Sessions révoquées"))
}
