use std::mem;

use anyhow::{Context, Result};
use crossterm::event::KeyCode;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Row, Table, TableState, Wrap};
use ratatui::Frame;
use tokio::runtime::Runtime;

use crate::db::{create_user, delete_user, fetch_users, update_user_name, Database};
use crate::models::User;

use super::forms::{ConfirmUserDelete, UserField, UserForm};
use super::helpers::{centered_rect, reselect, surface_error};

/// Footer space reserved for status messages and instructions.
const FOOTER_HEIGHT: u16 = 3;

/// Fine-grained modes layered over the user table.
enum Mode {
    Normal,
    AddingUser(UserForm),
    RenamingUser { id: i64, form: UserForm },
    ConfirmUserDelete(ConfirmUserDelete),
}

/// Holds the footer message text plus its severity.
struct StatusMessage {
    text: String,
    kind: StatusKind,
}

/// Severity levels shown in the footer.
enum StatusKind {
    Info,
    Error,
}

impl StatusKind {
    fn style(&self) -> Style {
        match self {
            StatusKind::Info => Style::default().fg(Color::Green),
            StatusKind::Error => Style::default().fg(Color::Red),
        }
    }
}

/// Central application state for the user list.
///
/// The TUI loop is synchronous, so the app owns the runtime and blocks on each
/// database call.
pub struct App {
    runtime: Runtime,
    db: Database,
    users: Vec<User>,
    table: TableState,
    mode: Mode,
    status: Option<StatusMessage>,
}

impl App {
    /// Load every user and build the initial view.
    pub fn load(runtime: Runtime, db: Database) -> Result<Self> {
        let users = runtime.block_on(fetch_users(&db))?;
        let mut table = TableState::default();
        table.select(reselect(&users, None, 0));
        Ok(Self {
            runtime,
            db,
            users,
            table,
            mode: Mode::Normal,
            status: None,
        })
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn selected_user(&self) -> Option<&User> {
        self.table.selected().and_then(|idx| self.users.get(idx))
    }

    /// Close the database before exiting.
    pub fn shutdown(self) -> Result<()> {
        self.runtime
            .block_on(self.db.close())
            .context("failed to close database")
    }

    /// Route a key press; returns `true` when the app should exit.
    pub fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        let mut exit = false;
        let mode = mem::replace(&mut self.mode, Mode::Normal);

        self.mode = match mode {
            Mode::Normal => self.handle_normal_key(code, &mut exit)?,
            Mode::AddingUser(form) => self.handle_add_user(code, form),
            Mode::RenamingUser { id, form } => self.handle_rename_user(code, id, form),
            Mode::ConfirmUserDelete(confirm) => self.handle_confirm_user_delete(code, confirm),
        };

        Ok(exit)
    }

    fn handle_normal_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => *exit = true,
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Home => self.table.select(reselect(&self.users, None, 0)),
            KeyCode::End => self.table.select(reselect(&self.users, None, usize::MAX)),
            KeyCode::Char('r') => match self.reload_users(None) {
                Ok(()) => {
                    let count = self.users.len();
                    self.set_status(format!("Loaded {count} users."), StatusKind::Info);
                }
                Err(err) => self.set_status(surface_error(&err), StatusKind::Error),
            },
            KeyCode::Char('a') => {
                self.clear_status();
                return Ok(Mode::AddingUser(UserForm::default()));
            }
            KeyCode::Char('e') => {
                if let Some(user) = self.selected_user() {
                    let mode = Mode::RenamingUser {
                        id: user.id,
                        form: UserForm::for_rename(user),
                    };
                    self.clear_status();
                    return Ok(mode);
                }
                self.set_status("No user selected.", StatusKind::Error);
            }
            KeyCode::Char('d') | KeyCode::Delete => {
                if let Some(user) = self.selected_user() {
                    return Ok(Mode::ConfirmUserDelete(ConfirmUserDelete::from(user)));
                }
                self.set_status("No user selected.", StatusKind::Error);
            }
            _ => {}
        }
        Ok(Mode::Normal)
    }

    fn handle_add_user(&mut self, code: KeyCode, mut form: UserForm) -> Mode {
        let mut keep_open = true;
        match code {
            KeyCode::Esc => {
                self.set_status("Add user cancelled.", StatusKind::Info);
                keep_open = false;
            }
            KeyCode::Tab | KeyCode::BackTab => form.toggle_field(),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => match self.save_new_user(&form) {
                Ok(()) => keep_open = false,
                Err(err) => {
                    let message = surface_error(&err);
                    form.error = Some(message.clone());
                    self.set_status(message, StatusKind::Error);
                }
            },
            KeyCode::Char(ch) => {
                if form.push_char(ch) {
                    form.error = None;
                }
            }
            _ => {}
        }

        if keep_open {
            Mode::AddingUser(form)
        } else {
            Mode::Normal
        }
    }

    fn handle_rename_user(&mut self, code: KeyCode, id: i64, mut form: UserForm) -> Mode {
        let mut keep_open = true;
        match code {
            KeyCode::Esc => {
                self.set_status("Rename cancelled.", StatusKind::Info);
                keep_open = false;
            }
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => match self.save_renamed_user(id, &form) {
                Ok(()) => keep_open = false,
                Err(err) => {
                    let message = surface_error(&err);
                    form.error = Some(message.clone());
                    self.set_status(message, StatusKind::Error);
                }
            },
            KeyCode::Char(ch) => {
                if form.push_char(ch) {
                    form.error = None;
                }
            }
            _ => {}
        }

        if keep_open {
            Mode::RenamingUser { id, form }
        } else {
            Mode::Normal
        }
    }

    fn handle_confirm_user_delete(&mut self, code: KeyCode, confirm: ConfirmUserDelete) -> Mode {
        match code {
            KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => {
                self.set_status("Deletion cancelled.", StatusKind::Info);
                Mode::Normal
            }
            KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('Y') => {
                match self.perform_delete(&confirm) {
                    Ok(()) => Mode::Normal,
                    Err(err) => {
                        self.set_status(surface_error(&err), StatusKind::Error);
                        Mode::ConfirmUserDelete(confirm)
                    }
                }
            }
            _ => Mode::ConfirmUserDelete(confirm),
        }
    }

    fn move_selection(&mut self, delta: isize) {
        if self.users.is_empty() {
            self.table.select(None);
            return;
        }
        let current = self.table.selected().unwrap_or(0);
        let next = current
            .saturating_add_signed(delta)
            .min(self.users.len() - 1);
        self.table.select(Some(next));
    }

    /// Replace the list with a fresh query, keeping the cursor on `focus`
    /// (or the currently selected user) when possible.
    fn reload_users(&mut self, focus: Option<i64>) -> Result<()> {
        let previous_index = self.table.selected().unwrap_or(0);
        let previous_id = focus.or_else(|| self.selected_user().map(|user| user.id));
        self.users = self.runtime.block_on(fetch_users(&self.db))?;
        self.table
            .select(reselect(&self.users, previous_id, previous_index));
        Ok(())
    }

    fn save_new_user(&mut self, form: &UserForm) -> Result<()> {
        let (email, name) = form.parse_inputs()?;
        let user = self.runtime.block_on(create_user(&self.db, &email, &name))?;
        self.reload_users(Some(user.id))?;
        self.set_status(format!("Added {}.", user.name), StatusKind::Info);
        Ok(())
    }

    fn save_renamed_user(&mut self, id: i64, form: &UserForm) -> Result<()> {
        let (_, name) = form.parse_inputs()?;
        self.runtime
            .block_on(update_user_name(&self.db, id, &name))?;
        self.reload_users(Some(id))?;
        self.set_status(format!("Renamed to {name}."), StatusKind::Info);
        Ok(())
    }

    fn perform_delete(&mut self, confirm: &ConfirmUserDelete) -> Result<()> {
        self.runtime.block_on(delete_user(&self.db, confirm.id))?;
        self.reload_users(None)?;
        self.set_status(format!("Removed {}.", confirm.name), StatusKind::Info);
        Ok(())
    }

    pub(crate) fn draw(&mut self, frame: &mut Frame) {
        let area = frame.area();
        let footer_height = FOOTER_HEIGHT.min(area.height);

        let (content_area, footer_area) = if area.height > footer_height {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(0), Constraint::Length(footer_height)])
                .split(area);
            (chunks[0], chunks[1])
        } else {
            (area, area)
        };

        self.draw_user_table(frame, content_area);

        if area.height >= footer_height {
            self.draw_footer(frame, footer_area);
        }

        match &self.mode {
            Mode::AddingUser(form) => self.draw_user_form(frame, area, "Add User", form),
            Mode::RenamingUser { form, .. } => {
                self.draw_user_form(frame, area, "Rename User", form)
            }
            Mode::ConfirmUserDelete(confirm) => self.draw_confirm_delete(frame, area, confirm),
            Mode::Normal => {}
        }
    }

    fn draw_user_table(&mut self, frame: &mut Frame, area: Rect) {
        let header_style = Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD);
        let header = Row::new(vec!["ID", "Name", "Email", "Created"]).style(header_style);

        let rows = self.users.iter().map(|user| {
            Row::new(vec![
                user.id.to_string(),
                user.name.clone(),
                user.email.clone(),
                user.date_created.clone(),
            ])
        });

        let title = format!("Users ({})", self.users.len());
        let table = Table::new(
            rows,
            [
                Constraint::Length(6),
                Constraint::Percentage(30),
                Constraint::Percentage(40),
                Constraint::Min(19),
            ],
        )
        .header(header)
        .block(Block::default().title(title).borders(Borders::ALL))
        .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("> ");

        if self.users.is_empty() {
            let empty = Paragraph::new("No users yet. Press [a] to add one.")
                .alignment(Alignment::Center)
                .block(Block::default().title("Users (0)").borders(Borders::ALL));
            frame.render_widget(empty, area);
        } else {
            frame.render_stateful_widget(table, area, &mut self.table);
        }
    }

    fn draw_footer(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::TOP);
        frame.render_widget(block.clone(), area);
        let inner = block.inner(area);

        let status_line = if let Some(status) = &self.status {
            Line::from(vec![Span::styled(status.text.clone(), status.kind.style())])
        } else {
            Line::from("")
        };

        let instructions = self.footer_instructions();

        let paragraph = Paragraph::new(vec![status_line, instructions]).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn footer_instructions(&self) -> Line<'static> {
        let key_style = Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD);
        match &self.mode {
            Mode::AddingUser(_) => Line::from(vec![
                Span::styled("[Enter]", key_style),
                Span::raw(" Save   "),
                Span::styled("[Tab]", key_style),
                Span::raw(" Switch Field   "),
                Span::styled("[Esc]", key_style),
                Span::raw(" Cancel"),
            ]),
            // Email is locked while renaming, so there is no field to switch to.
            Mode::RenamingUser { .. } => Line::from(vec![
                Span::styled("[Enter]", key_style),
                Span::raw(" Save   "),
                Span::styled("[Esc]", key_style),
                Span::raw(" Cancel"),
            ]),
            Mode::ConfirmUserDelete(_) => Line::from(vec![
                Span::styled("[y]", key_style),
                Span::raw(" Confirm   "),
                Span::styled("[n/Esc]", key_style),
                Span::raw(" Cancel"),
            ]),
            Mode::Normal => Line::from(vec![
                Span::styled("[↑↓]", key_style),
                Span::raw(" Navigate   "),
                Span::styled("[a]", key_style),
                Span::raw(" Add   "),
                Span::styled("[e]", key_style),
                Span::raw(" Rename   "),
                Span::styled("[d]", key_style),
                Span::raw(" Delete   "),
                Span::styled("[r]", key_style),
                Span::raw(" Reload   "),
                Span::styled("[q]", key_style),
                Span::raw(" Quit"),
            ]),
        }
    }

    fn draw_user_form(&self, frame: &mut Frame, area: Rect, title: &str, form: &UserForm) {
        let popup_area = centered_rect(60, 40, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default().title(title).borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let email_line = form.build_line("Email", UserField::Email);
        let name_line = form.build_line("Name", UserField::Name);

        let mut lines = vec![email_line, name_line, Line::from("")];

        if let Some(error) = &form.error {
            lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(Color::Red),
            )));
        } else {
            let hint = if form.email_locked {
                "Enter to save • Esc to cancel"
            } else {
                "Enter to save • Tab to switch • Esc to cancel"
            };
            lines.push(Line::from(Span::styled(hint, Style::default().fg(Color::Gray))));
        }

        let paragraph = Paragraph::new(lines).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);

        let (prefix, row) = match form.active {
            UserField::Email => ("Email: ".len() as u16, 0),
            UserField::Name => ("Name: ".len() as u16, 1),
        };
        frame.set_cursor_position((
            inner.x + prefix + form.value_len(form.active) as u16,
            inner.y + row,
        ));
    }

    fn draw_confirm_delete(&self, frame: &mut Frame, area: Rect, confirm: &ConfirmUserDelete) {
        let popup_area = centered_rect(60, 30, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default()
            .title("Confirm Removal")
            .borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let lines = vec![
            Line::from(format!("Remove {} ({})?", confirm.name, confirm.email)),
            Line::from(""),
            Line::from(Span::styled(
                "Press Y to confirm or N / Esc to cancel.",
                Style::default().fg(Color::Gray),
            )),
        ];

        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Left)
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn set_status<S: Into<String>>(&mut self, text: S, kind: StatusKind) {
        self.status = Some(StatusMessage {
            text: text.into(),
            kind,
        });
    }

    fn clear_status(&mut self) {
        self.status = None;
    }
}
