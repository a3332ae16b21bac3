use crate::report::{Group, Report};

#[derive(PartialEq)]
pub enum InputMode {
    Normal,
    FilterInput,
    SearchInput,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Pane {
    Image,
    Log,
}

pub struct App {
    pub report: Report,
    pub pane: Pane,
    pub filter: Option<Group>,
    pub search: Option<String>,
    pub search_match_index: usize,
    pub scroll_offset: usize,
    pub mode: InputMode,
    pub input_buf: String,
    /// One-line message shown in the header until the next key press
    pub notice: Option<String>,
    pub should_quit: bool,
}

impl App {
    pub fn new(report: Report) -> Self {
        Self {
            report,
            pane: Pane::Image,
            filter: None,
            search: None,
            search_match_index: 0,
            scroll_offset: 0,
            mode: InputMode::Normal,
            input_buf: String::new(),
            notice: None,
            should_quit: false,
        }
    }

    /// Indices into the current pane's rows that pass the group filter.
    /// The group filter only applies to the image pane.
    pub fn visible_indices(&self) -> Vec<usize> {
        match self.pane {
            Pane::Image => self
                .report
                .rows
                .iter()
                .enumerate()
                .filter(|(_, row)| self.filter.map_or(true, |group| row.group == group))
                .map(|(i, _)| i)
                .collect(),
            Pane::Log => (0..self.report.log.len()).collect(),
        }
    }

    /// Searchable text of one row in the current pane
    pub fn line_text(&self, index: usize) -> String {
        match self.pane {
            Pane::Image => {
                let row = &self.report.rows[index];
                format!("{} {}", row.label, row.value)
            }
            Pane::Log => {
                let entry = &self.report.log[index];
                format!("{} {}", entry.tag, entry.message)
            }
        }
    }

    pub fn search_match_indices(&self) -> Vec<usize> {
        let Some(ref query) = self.search else {
            return Vec::new();
        };
        let query_lower = query.to_ascii_lowercase();
        self.visible_indices()
            .into_iter()
            .filter(|&i| self.line_text(i).to_ascii_lowercase().contains(&query_lower))
            .collect()
    }

    pub fn toggle_pane(&mut self) {
        self.pane = match self.pane {
            Pane::Image => Pane::Log,
            Pane::Log => Pane::Image,
        };
        self.scroll_offset = 0;
        self.search_match_index = 0;
    }

    pub fn submit_filter(&mut self) {
        let name = self.input_buf.trim().to_string();
        self.input_buf.clear();
        self.mode = InputMode::Normal;
        if name.is_empty() {
            self.filter = None;
        } else {
            match Group::ALL
                .into_iter()
                .find(|group| group.title().eq_ignore_ascii_case(&name))
            {
                Some(group) => self.filter = Some(group),
                None => {
                    self.notice = Some(format!("no group named \"{}\"", name));
                    return;
                }
            }
        }
        self.scroll_offset = 0;
    }

    pub fn submit_search(&mut self) {
        let query = self.input_buf.trim().to_string();
        self.search = if query.is_empty() { None } else { Some(query) };
        self.search_match_index = 0;
        self.input_buf.clear();
        self.mode = InputMode::Normal;
    }

    pub fn next_match(&mut self) {
        let matches = self.search_match_indices();
        if matches.is_empty() {
            return;
        }
        self.search_match_index = (self.search_match_index + 1) % matches.len();
    }

    pub fn prev_match(&mut self) {
        let matches = self.search_match_indices();
        if matches.is_empty() {
            return;
        }
        self.search_match_index = if self.search_match_index == 0 {
            matches.len() - 1
        } else {
            self.search_match_index - 1
        };
    }

    pub fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(1);
    }

    pub fn scroll_down(&mut self, visible_count: usize, viewport_height: usize) {
        if visible_count > viewport_height {
            self.scroll_offset = (self.scroll_offset + 1).min(visible_count - viewport_height);
        }
    }

    pub fn jump_to_top(&mut self) {
        self.scroll_offset = 0;
    }

    pub fn jump_to_bottom(&mut self, visible_count: usize, viewport_height: usize) {
        self.scroll_offset = visible_count.saturating_sub(viewport_height);
    }
}
