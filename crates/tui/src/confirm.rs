use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};

/// What happens when the operator answers Yes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    RemoveTemplate(usize),
}

pub struct ConfirmDialog {
    pub message: String,
    pub action: PendingAction,
    pub selected: bool, // true = Yes
}

impl ConfirmDialog {
    pub fn new(message: impl Into<String>, action: PendingAction) -> Self {
        Self {
            message: message.into(),
            action,
            selected: false,
        }
    }

    pub fn toggle(&mut self) {
        self.selected = !self.selected;
    }

    pub fn render(&self, f: &mut Frame) {
        let width = (self.message.chars().count() as u16 + 6).max(30);
        let area = centered_rect(width, 7, f.area());
        f.render_widget(Clear, area);

        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(" Confirm ");
        let inner = block.inner(area);
        f.render_widget(block, area);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1), // message
                Constraint::Length(1),
                Constraint::Length(1), // buttons
            ])
            .split(inner);

        let msg = Paragraph::new(Line::from(Span::styled(
            &self.message,
            Style::default().fg(Color::White),
        )))
        .alignment(Alignment::Center);
        f.render_widget(msg, rows[1]);

        let active = |color: Color| Style::default().fg(Color::Black).bg(color).add_modifier(Modifier::BOLD);
        let dim = Style::default().fg(Color::DarkGray);
        let buttons = Line::from(vec![
            Span::styled("  [Yes]  ", if self.selected { active(Color::Green) } else { dim }),
            Span::raw("   "),
            Span::styled("  [No]  ", if self.selected { dim } else { active(Color::Red) }),
        ]);
        f.render_widget(Paragraph::new(buttons).alignment(Alignment::Center), rows[3]);
    }
}

/// Centered `width` x `height` rect inside `area`, clipped to it.
pub(crate) fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width.min(area.width), height.min(area.height))
}
