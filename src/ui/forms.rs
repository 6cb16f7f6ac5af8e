use anyhow::{anyhow, Result};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};

use crate::models::User;

/// Internal representation of the "user" form fields.
#[derive(Default, Clone)]
pub(crate) struct UserForm {
    pub(crate) email: String,
    pub(crate) name: String,
    pub(crate) active: UserField,
    /// Renaming keeps the address fixed; focus never reaches the email field.
    pub(crate) email_locked: bool,
    pub(crate) error: Option<String>,
}

/// Fields available within the user form.
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub(crate) enum UserField {
    #[default]
    Email,
    Name,
}

impl UserForm {
    /// Populate the form from an existing user for a rename.
    pub(crate) fn for_rename(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            name: user.name.clone(),
            active: UserField::Name,
            email_locked: true,
            error: None,
        }
    }

    /// Swap focus between the email and name fields.
    pub(crate) fn toggle_field(&mut self) {
        if self.email_locked {
            return;
        }
        self.active = match self.active {
            UserField::Email => UserField::Name,
            UserField::Name => UserField::Email,
        };
    }

    /// Append a character to the active field, validating allowed input.
    pub(crate) fn push_char(&mut self, ch: char) -> bool {
        if ch.is_control() {
            return false;
        }
        match self.active {
            UserField::Email => {
                if ch.is_whitespace() {
                    false
                } else {
                    self.email.push(ch);
                    true
                }
            }
            UserField::Name => {
                self.name.push(ch);
                true
            }
        }
    }

    /// Remove the last character from the active field.
    pub(crate) fn backspace(&mut self) {
        match self.active {
            UserField::Email => {
                self.email.pop();
            }
            UserField::Name => {
                self.name.pop();
            }
        }
    }

    /// Validate the inputs and return trimmed `(email, name)`.
    pub(crate) fn parse_inputs(&self) -> Result<(String, String)> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(anyhow!("Email is required."));
        }
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(anyhow!("Email must look like name@domain.")),
        }
        let name = self.name.trim();
        if name.is_empty() {
            return Err(anyhow!("Name is required."));
        }
        Ok((email.to_string(), name.to_string()))
    }

    /// Render a single line for the form widget.
    pub(crate) fn build_line(&self, field_name: &str, field: UserField) -> Line<'static> {
        let value = match field {
            UserField::Email => &self.email,
            UserField::Name => &self.name,
        };
        let is_active = self.active == field;

        let display = if value.is_empty() {
            "<required>".to_string()
        } else {
            value.clone()
        };

        let style = if is_active {
            Style::default().fg(Color::Yellow)
        } else if value.is_empty() || (field == UserField::Email && self.email_locked) {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };

        Line::from(vec![
            Span::raw(format!("{field_name}: ")),
            Span::styled(display, style),
        ])
    }

    /// Return the character count for the requested field.
    pub(crate) fn value_len(&self, field: UserField) -> usize {
        match field {
            UserField::Email => self.email.chars().count(),
            UserField::Name => self.name.chars().count(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ConfirmUserDelete {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) email: String,
}

impl ConfirmUserDelete {
    /// Build the confirmation state from the user being considered.
    pub(crate) fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}
