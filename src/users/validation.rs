use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::error::Violations;
use crate::users::dto::{CreateUserRequest, ListUsersQuery, UpdateUserRequest};
use crate::users::repo_types::{NewUser, UserChanges, UserFilter, MAX_LIMIT};

const NAME_MAX: usize = 100;
const EMAIL_MAX: usize = 255;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn check_email(raw: String, violations: &mut Violations) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.chars().count() > EMAIL_MAX {
        violations.push("email", format!("must be at most {EMAIL_MAX} characters"));
        None
    } else if !is_valid_email(&email) {
        violations.push("email", "must be a valid email");
        None
    } else {
        Some(email)
    }
}

fn check_name(field: &'static str, raw: String, violations: &mut Violations) -> Option<String> {
    let name = raw.trim();
    let len = name.chars().count();
    if len == 0 || len > NAME_MAX {
        violations.push(field, format!("must be between 1 and {NAME_MAX} characters"));
        None
    } else {
        Some(name.to_string())
    }
}

pub fn validate_create(req: CreateUserRequest) -> Result<NewUser, Violations> {
    let mut violations = Violations::default();

    let email = match req.email {
        Some(raw) => check_email(raw, &mut violations),
        None => {
            violations.push("email", "is required");
            None
        }
    };
    let first_name = match req.first_name {
        Some(raw) => check_name("firstName", raw, &mut violations),
        None => {
            violations.push("firstName", "is required");
            None
        }
    };
    let last_name = match req.last_name {
        Some(raw) => check_name("lastName", raw, &mut violations),
        None => {
            violations.push("lastName", "is required");
            None
        }
    };

    match (email, first_name, last_name) {
        (Some(email), Some(first_name), Some(last_name)) if violations.is_empty() => Ok(NewUser {
            email,
            first_name,
            last_name,
            is_active: req.is_active.unwrap_or(true),
        }),
        _ => Err(violations),
    }
}

pub fn validate_update(req: UpdateUserRequest) -> Result<UserChanges, Violations> {
    let mut violations = Violations::default();

    let supplied = req.email.is_some()
        || req.first_name.is_some()
        || req.last_name.is_some()
        || req.is_active.is_some();
    if !supplied {
        return Err(Violations::single(
            "body",
            "at least one field must be supplied",
        ));
    }

    let changes = UserChanges {
        email: req.email.and_then(|raw| check_email(raw, &mut violations)),
        first_name: req
            .first_name
            .and_then(|raw| check_name("firstName", raw, &mut violations)),
        last_name: req
            .last_name
            .and_then(|raw| check_name("lastName", raw, &mut violations)),
        is_active: req.is_active,
    };

    if violations.is_empty() {
        Ok(changes)
    } else {
        Err(violations)
    }
}

pub fn validate_list(query: ListUsersQuery) -> Result<UserFilter, Violations> {
    let mut violations = Violations::default();
    let mut filter = UserFilter::default();

    if let Some(raw) = query.is_active.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        match raw {
            "true" => filter.is_active = Some(true),
            "false" => filter.is_active = Some(false),
            _ => violations.push("isActive", "must be true or false"),
        }
    }

    filter.email_contains = query
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());

    if let Some(raw) = query.limit.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        match raw.parse::<i64>() {
            Ok(limit) if (1..=MAX_LIMIT).contains(&limit) => filter.limit = limit,
            _ => violations.push("limit", format!("must be an integer between 1 and {MAX_LIMIT}")),
        }
    }

    if let Some(raw) = query.offset.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        match raw.parse::<i64>() {
            Ok(offset) if offset >= 0 => filter.offset = offset,
            _ => violations.push("offset", "must be a non-negative integer"),
        }
    }

    if violations.is_empty() {
        Ok(filter)
    } else {
        Err(violations)
    }
}

pub fn parse_user_id(raw: &str) -> Result<Uuid, Violations> {
    Uuid::parse_str(raw.trim()).map_err(|_| Violations::single("id", "must be a valid UUID"))
}
