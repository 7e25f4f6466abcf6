//! Declarative input constraints for assessment fields and the auth forms.
//!
//! Form validators report the first failing constraint in field order, which is what the
//! login and registration pages render under the form.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{AssessmentData, PartialAssessment, Sex};

/// Inclusive numeric range for one assessment field.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: &'static str,
    pub min: f64,
    pub max: f64,
    pub min_message: &'static str,
    pub max_message: &'static str,
}

impl FieldRule {
    pub fn check(&self, value: f64) -> Result<(), ValidationError> {
        if !value.is_finite() || value < self.min {
            Err(ValidationError::new(self.field, self.min_message))
        } else if value > self.max {
            Err(ValidationError::new(self.field, self.max_message))
        } else {
            Ok(())
        }
    }
}

pub const AGE: FieldRule = FieldRule {
    field: "age",
    min: 18.0,
    max: 85.0,
    min_message: "La edad debe ser al menos 18 años",
    max_message: "La edad debe ser como máximo 85 años",
};
pub const HEIGHT: FieldRule = FieldRule {
    field: "height_cm",
    min: 120.0,
    max: 220.0,
    min_message: "La estatura debe ser al menos 120 cm",
    max_message: "La estatura debe ser como máximo 220 cm",
};
pub const WEIGHT: FieldRule = FieldRule {
    field: "weight_kg",
    min: 30.0,
    max: 220.0,
    min_message: "El peso debe ser al menos 30 kg",
    max_message: "El peso debe ser como máximo 220 kg",
};
pub const WAIST: FieldRule = FieldRule {
    field: "waist_cm",
    min: 40.0,
    max: 170.0,
    min_message: "La circunferencia de cintura debe ser al menos 40 cm",
    max_message: "La circunferencia de cintura debe ser como máximo 170 cm",
};
pub const SLEEP: FieldRule = FieldRule {
    field: "sleep_hours",
    min: 3.0,
    max: 14.0,
    min_message: "Las horas de sueño deben ser al menos 3",
    max_message: "Las horas de sueño deben ser como máximo 14",
};
pub const CIGARETTES: FieldRule = FieldRule {
    field: "smokes_cig_day",
    min: 0.0,
    max: 60.0,
    min_message: "Los cigarrillos por día no pueden ser negativos",
    max_message: "Los cigarrillos por día deben ser como máximo 60",
};
pub const ACTIVITY_DAYS: FieldRule = FieldRule {
    field: "days_mvpa_week",
    min: 0.0,
    max: 7.0,
    min_message: "Los días de actividad física no pueden ser negativos",
    max_message: "Los días de actividad física deben ser como máximo 7",
};
pub const FRUIT_VEG: FieldRule = FieldRule {
    field: "fruit_veg_portions_day",
    min: 0.0,
    max: 12.0,
    min_message: "Las porciones de frutas y verduras no pueden ser negativas",
    max_message: "Las porciones de frutas y verduras deben ser como máximo 12",
};

/// Rule and accessor pairs in schema order.
fn numeric_fields(p: &PartialAssessment) -> [(FieldRule, Option<f64>); 8] {
    [
        (AGE, p.age),
        (HEIGHT, p.height_cm),
        (WEIGHT, p.weight_kg),
        (WAIST, p.waist_cm),
        (SLEEP, p.sleep_hours),
        (CIGARETTES, p.smokes_cig_day),
        (ACTIVITY_DAYS, p.days_mvpa_week),
        (FRUIT_VEG, p.fruit_veg_portions_day),
    ]
}

/// Validate a complete snapshot; returns every violation.
pub fn validate_assessment(data: &AssessmentData) -> Result<(), Vec<ValidationError>> {
    validate_partial(&PartialAssessment::from(data))
}

/// Validate only the fields that are present.
pub fn validate_partial(data: &PartialAssessment) -> Result<(), Vec<ValidationError>> {
    let errors: Vec<ValidationError> = numeric_fields(data)
        .into_iter()
        .filter_map(|(rule, value)| value.and_then(|v| rule.check(v).err()))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Form steps of the manual assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentStep {
    Anthropometry,
    Lifestyle,
    Diet,
}

impl AssessmentStep {
    pub fn rules(&self) -> &'static [FieldRule] {
        match self {
            AssessmentStep::Anthropometry => &[HEIGHT, WEIGHT, WAIST],
            AssessmentStep::Lifestyle => &[SLEEP, CIGARETTES, ACTIVITY_DAYS],
            AssessmentStep::Diet => &[FRUIT_VEG],
        }
    }
}

/// Every field of the step must be present and within range.
pub fn validate_step(step: AssessmentStep, data: &PartialAssessment) -> Result<(), Vec<ValidationError>> {
    let present = numeric_fields(data);
    let mut errors = Vec::new();
    for rule in step.rules() {
        let value = present
            .iter()
            .find(|(r, _)| r.field == rule.field)
            .and_then(|(_, v)| *v);
        match value {
            Some(v) => {
                if let Err(e) = rule.check(v) {
                    errors.push(e);
                }
            }
            None => errors.push(ValidationError::new(rule.field, "Campo obligatorio")),
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Raw login form as posted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

/// Raw registration form as posted (every value arrives as text).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "confirmPassword", alias = "confirm_password")]
    pub confirm_password: Option<String>,
    #[serde(default, rename = "firstName", alias = "first_name")]
    pub first_name: Option<String>,
    #[serde(default, rename = "lastName", alias = "last_name")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub age: i64,
    pub sex: Sex,
}

const PASSWORD_MIN: usize = 6;
const NAME_MAX: usize = 120;

fn validate_email(raw: Option<&str>) -> Result<String, ValidationError> {
    let Some(raw) = raw else {
        return Err(ValidationError::new("email", "El correo es obligatorio"));
    };
    let email = raw.trim();
    if email.is_empty() {
        return Err(ValidationError::new("email", "El correo es obligatorio"));
    }
    if !looks_like_email(email) {
        return Err(ValidationError::new("email", "Correo inválido"));
    }
    Ok(email.to_lowercase())
}

/// Dot-separated local atoms, then a dotted domain ending in a 2+ letter TLD.
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_'+\-]+(\.[A-Za-z0-9_'+\-]+)*@([A-Za-z0-9][A-Za-z0-9\-]*\.)+[A-Za-z]{2,}$")
        .expect("email pattern compiles")
});

fn looks_like_email(s: &str) -> bool {
    EMAIL_PATTERN.is_match(s)
}

fn validate_password(
    field: &'static str,
    raw: Option<&str>,
    required: &str,
    too_short: &str,
) -> Result<String, ValidationError> {
    let Some(p) = raw else {
        return Err(ValidationError::new(field, required));
    };
    if p.chars().count() < PASSWORD_MIN {
        return Err(ValidationError::new(field, too_short));
    }
    Ok(p.to_string())
}

fn validate_name(
    field: &'static str,
    raw: Option<&str>,
    required: &str,
    too_long: &str,
) -> Result<String, ValidationError> {
    let name = raw.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(ValidationError::new(field, required));
    }
    if name.chars().count() > NAME_MAX {
        return Err(ValidationError::new(field, too_long));
    }
    Ok(name.to_string())
}

/// Leading-integer parse: optional sign then digits, trailing text ignored.
fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|v| sign * v)
}

fn validate_age(raw: Option<&str>) -> Result<i64, ValidationError> {
    let Some(raw) = raw else {
        return Err(ValidationError::new("age", "La edad es obligatoria"));
    };
    let age = parse_leading_int(raw)
        .ok_or_else(|| ValidationError::new("age", "La edad debe ser un número entero"))?;
    if !(18..=120).contains(&age) {
        return Err(ValidationError::new("age", "Edad debe estar entre 18 y 120 años"));
    }
    Ok(age)
}

fn validate_sex(raw: Option<&str>) -> Result<Sex, ValidationError> {
    let Some(raw) = raw else {
        return Err(ValidationError::new("sex", "Debes seleccionar el sexo"));
    };
    Sex::parse(raw).ok_or_else(|| ValidationError::new("sex", "Selecciona un sexo válido"))
}

pub fn validate_login(form: &LoginForm) -> Result<LoginInput, ValidationError> {
    let email = validate_email(form.email.as_deref())?;
    let password = validate_password(
        "password",
        form.password.as_deref(),
        "La contraseña es obligatoria",
        "La contraseña debe tener al menos 6 caracteres",
    )?;
    Ok(LoginInput { email, password })
}

pub fn validate_register(form: &RegisterForm) -> Result<RegisterInput, ValidationError> {
    let email = validate_email(form.email.as_deref())?;
    let password = validate_password(
        "password",
        form.password.as_deref(),
        "La contraseña es obligatoria",
        "La contraseña debe tener al menos 6 caracteres",
    )?;
    let confirm = validate_password(
        "confirmPassword",
        form.confirm_password.as_deref(),
        "Debes confirmar la contraseña",
        "La confirmación debe tener al menos 6 caracteres",
    )?;
    let first_name = validate_name(
        "firstName",
        form.first_name.as_deref(),
        "El nombre es obligatorio",
        "El nombre es demasiado largo",
    )?;
    let last_name = validate_name(
        "lastName",
        form.last_name.as_deref(),
        "El apellido es obligatorio",
        "El apellido es demasiado largo",
    )?;
    let age = validate_age(form.age.as_deref())?;
    let sex = validate_sex(form.sex.as_deref())?;

    if password != confirm {
        return Err(ValidationError::new("confirmPassword", "Las contraseñas no coinciden"));
    }

    Ok(RegisterInput {
        email,
        password,
        first_name,
        last_name,
        age,
        sex,
    })
}
