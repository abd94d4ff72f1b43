//! Client-side checks run before a form is submitted.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::error::{ClientError, ClientResult};
use crate::models::{ImageUpload, NewResource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: &str) -> Self {
        Self {
            field,
            message: message.to_owned(),
        }
    }
}

pub trait Validate {
    fn validate(&self) -> Vec<FieldError>;

    fn check(&self) -> ClientResult<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ClientError::Validation(errors))
        }
    }
}

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_'+\-.]*[A-Za-z0-9_+\-]@([A-Za-z0-9][A-Za-z0-9\-]*\.)+[A-Za-z]{2,}$")
        .expect("email pattern compiles")
});

fn is_email(value: &str) -> bool {
    !value.starts_with('.') && !value.contains("..") && EMAIL.is_match(value)
}

fn check_email(email: &str, errors: &mut Vec<FieldError>) {
    if !is_email(email.trim()) {
        errors.push(FieldError::new("email", "Please enter a valid email address"));
    }
}

fn check_strong_password(field: &'static str, password: &str, errors: &mut Vec<FieldError>) {
    let rules: [(bool, &str); 4] = [
        (
            password.chars().count() >= 8,
            "Password must be at least 8 characters long",
        ),
        (
            password.chars().any(|c| c.is_ascii_uppercase()),
            "Password must contain at least one uppercase letter",
        ),
        (
            password.chars().any(|c| c.is_ascii_lowercase()),
            "Password must contain at least one lowercase letter",
        ),
        (
            password.chars().any(|c| c.is_ascii_digit()),
            "Password must contain at least one number",
        ),
    ];
    if let Some((_, message)) = rules.iter().find(|(ok, _)| !ok) {
        errors.push(FieldError::new(field, message));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpForm {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl Validate for SignUpForm {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.name.trim().chars().count() < 3 {
            errors.push(FieldError::new("name", "Name must be at least 3 characters"));
        }
        check_email(&self.email, &mut errors);
        check_strong_password("password", &self.password, &mut errors);
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInForm {
    pub email: String,
    pub password: String,
}

impl Validate for SignInForm {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_email(&self.email, &mut errors);
        if self.password.chars().count() < 8 {
            errors.push(FieldError::new("password", "Please enter your password"));
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgotPasswordForm {
    pub email: String,
}

impl Validate for ForgotPasswordForm {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_email(&self.email, &mut errors);
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetPasswordForm {
    pub password: String,
    pub confirm_password: String,
}

impl Validate for ResetPasswordForm {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_strong_password("password", &self.password, &mut errors);
        if self.password != self.confirm_password {
            errors.push(FieldError::new("confirmPassword", "Passwords do not match"));
        }
        errors
    }
}

/// Thumbnails must be JPEG or PNG.
pub fn check_thumbnail(image: &ImageUpload) -> Result<(), FieldError> {
    let mime = image.mime.to_ascii_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/png" => Ok(()),
        _ => Err(FieldError::new(
            "image",
            "Invalid file type jpeg, jpg, or png. Please upload an image.",
        )),
    }
}

impl Validate for NewResource {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.title.trim().chars().count() < 5 {
            errors.push(FieldError::new("title", "Title must be at least 5 characters"));
        }
        if self.description.trim().chars().count() < 20 {
            errors.push(FieldError::new(
                "description",
                "Description must be at least 20 characters",
            ));
        }
        if Url::parse(self.url.trim()).is_err() {
            errors.push(FieldError::new("url", "Please enter a valid URL"));
        }
        if self.category_name.trim().is_empty() {
            errors.push(FieldError::new("categoryName", "Please select a category"));
        }
        if self.tag_list().is_empty() {
            errors.push(FieldError::new("tags", "Please select at least one tag"));
        }
        if let Some(image_url) = &self.image_url {
            if Url::parse(image_url).is_err() {
                errors.push(FieldError::new("image", "Please enter a valid URL"));
            }
        }
        if let Some(image) = &self.image {
            if let Err(err) = check_thumbnail(image) {
                errors.push(err);
            }
        }
        errors
    }
}
