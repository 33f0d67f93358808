use aula::{ActiveSession, ClientInfo, Role, User};
use serde::{Deserialize, Serialize};

/// Login form. `role` is the context the user wants to work in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
    pub role: String,
}

impl LoginBody {
    pub(crate) fn into_request(self) -> Result<aula::LoginRequest, aula::Error> {
        Ok(aula::LoginRequest {
            role: parse_role(&self.role)?,
            email: self.email,
            password: self.password,
        })
    }
}

/// Second step of a login guarded by two-factor authentication.
///
/// `code` is either the current TOTP code or an unused recovery code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyTwoFactorBody {
    pub email: String,
    pub password: String,
    pub role: String,
    pub code: String,
}

impl VerifyTwoFactorBody {
    pub(crate) fn into_request(self) -> Result<aula::TwoFactorLoginRequest, aula::Error> {
        Ok(aula::TwoFactorLoginRequest {
            role: parse_role(&self.role)?,
            email: self.email,
            password: self.password,
            code: self.code,
        })
    }
}

fn parse_role(role: &str) -> Result<Role, aula::Error> {
    Ok(role.parse::<Role>()?)
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginResponse {
    Authenticated {
        token: String,
        user: User,
        session: ActiveSession,
    },
    TwoFactorRequired,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<ActiveSession>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub session: ActiveSession,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl From<ConnectionInfo> for ClientInfo {
    fn from(info: ConnectionInfo) -> Self {
        ClientInfo::new(info.ip, info.user_agent)
    }
}

/// The session and user behind the bearer token of the current request.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub session: ActiveSession,
    pub user: User,
}
