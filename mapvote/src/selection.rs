//! Paginated selection menus
//!
//! A [`SelectionMenu`] holds one session per participant: the candidate list
//! they are picking from and the page they are looking at. Nomination and
//! forcemap each own a menu; what happens on confirmation is up to the caller.

use std::collections::HashMap;

use tracing::debug;

use crate::catalog::MapEntry;
use crate::ParticipantId;

/// Which flow a menu serves. Used for headers and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionFlow {
    Nominate,
    Forcemap,
}

impl std::fmt::Display for SelectionFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nominate => write!(f, "nominate"),
            Self::Forcemap => write!(f, "forcemap"),
        }
    }
}

/// One rendered page of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuPage {
    pub flow: SelectionFlow,
    /// Zero-based page index
    pub page: usize,
    pub total_pages: usize,
    /// `(display number, entry)` pairs, numbered from 1 on every page
    pub items: Vec<(usize, MapEntry)>,
}

impl MenuPage {
    /// Chat lines for this page
    pub fn render(&self) -> Vec<String> {
        let prefix = match self.flow {
            SelectionFlow::Nominate => "",
            SelectionFlow::Forcemap => "[Forcemap] ",
        };
        let mut lines = Vec::with_capacity(self.items.len() + 2);
        lines.push(format!(
            "{}Page {}/{}. Type number to select (or 'cancel'):",
            prefix,
            self.page + 1,
            self.total_pages
        ));
        for (number, entry) in &self.items {
            lines.push(format!("[{}] {}", number, entry.display_name));
        }
        if self.total_pages > 1 {
            lines.push("[0] Next Page".to_string());
        }
        lines
    }
}

/// Result of opening a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Nothing to pick from; no session was created
    Empty,
    /// A filtered search matched exactly one map; no session was created
    Immediate(MapEntry),
    /// Session created at page 0
    Opened(MenuPage),
}

/// Result of feeding chat text to an open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuInput {
    /// Session destroyed on request
    Cancelled,
    /// Page advanced; render again
    Page(MenuPage),
    /// Candidate confirmed; session destroyed
    Selected(MapEntry),
    /// Not menu input (or no session); caller may try other interpretations
    Ignored,
}

#[derive(Debug, Clone)]
struct MenuSession {
    candidates: Vec<MapEntry>,
    page: usize,
}

/// Per-participant paginated picker
#[derive(Debug)]
pub struct SelectionMenu {
    flow: SelectionFlow,
    page_size: usize,
    sessions: HashMap<ParticipantId, MenuSession>,
}

impl SelectionMenu {
    pub fn new(flow: SelectionFlow, page_size: usize) -> Self {
        Self {
            flow,
            page_size: page_size.max(1),
            sessions: HashMap::new(),
        }
    }

    pub fn flow(&self) -> SelectionFlow {
        self.flow
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Start a session. `filtered` says whether a search term narrowed the
    /// candidates; only then does a single match skip the menu.
    pub fn open(
        &mut self,
        participant: ParticipantId,
        mut candidates: Vec<MapEntry>,
        filtered: bool,
    ) -> OpenOutcome {
        self.sessions.remove(&participant);

        if filtered && candidates.len() == 1 {
            if let Some(entry) = candidates.pop() {
                return OpenOutcome::Immediate(entry);
            }
        }
        if candidates.is_empty() {
            return OpenOutcome::Empty;
        }

        debug!(
            participant,
            flow = %self.flow,
            candidates = candidates.len(),
            "Selection session opened"
        );
        let page = build_page(self.flow, &candidates, 0, self.page_size);
        self.sessions
            .insert(participant, MenuSession { candidates, page: 0 });
        OpenOutcome::Opened(page)
    }

    /// Feed raw chat text to the participant's session
    pub fn input(&mut self, participant: ParticipantId, text: &str) -> MenuInput {
        let text = text.trim();
        let Some(session) = self.sessions.get_mut(&participant) else {
            return MenuInput::Ignored;
        };

        if text.eq_ignore_ascii_case("cancel") {
            self.sessions.remove(&participant);
            return MenuInput::Cancelled;
        }

        let total = total_pages(session.candidates.len(), self.page_size);
        if text == "0" {
            session.page = (session.page + 1) % total.max(1);
            return match self.render(participant) {
                Some(page) => MenuInput::Page(page),
                None => MenuInput::Ignored,
            };
        }

        let Ok(number) = text.parse::<usize>() else {
            return MenuInput::Ignored;
        };
        let Some(index) = page_index(session.page, self.page_size, number, session.candidates.len())
        else {
            return MenuInput::Ignored;
        };

        let entry = session.candidates[index].clone();
        self.sessions.remove(&participant);
        MenuInput::Selected(entry)
    }

    /// Render the participant's current page
    pub fn render(&self, participant: ParticipantId) -> Option<MenuPage> {
        let session = self.sessions.get(&participant)?;
        Some(build_page(
            self.flow,
            &session.candidates,
            session.page,
            self.page_size,
        ))
    }

    pub fn is_open(&self, participant: ParticipantId) -> bool {
        self.sessions.contains_key(&participant)
    }

    /// Current zero-based page of the participant's session
    pub fn page_of(&self, participant: ParticipantId) -> Option<usize> {
        self.sessions.get(&participant).map(|s| s.page)
    }

    /// Destroy the participant's session, if any
    pub fn close(&mut self, participant: ParticipantId) -> bool {
        self.sessions.remove(&participant).is_some()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn build_page(
    flow: SelectionFlow,
    candidates: &[MapEntry],
    page: usize,
    page_size: usize,
) -> MenuPage {
    let count = candidates.len();
    let total = total_pages(count, page_size);
    let page = if page >= total { 0 } else { page };

    let start = page * page_size;
    let end = (start + page_size).min(count);
    let items = candidates[start..end]
        .iter()
        .enumerate()
        .map(|(i, entry)| (i + 1, entry.clone()))
        .collect();

    MenuPage {
        flow,
        page,
        total_pages: total,
        items,
    }
}

/// `ceil(count / page_size)`
pub fn total_pages(count: usize, page_size: usize) -> usize {
    count.div_ceil(page_size.max(1))
}

/// Map a 1-based on-page number to a candidate index, if it lies within the
/// current page's slice
pub fn page_index(page: usize, page_size: usize, number: usize, count: usize) -> Option<usize> {
    if number == 0 || number > page_size {
        return None;
    }
    let start = page * page_size;
    let index = start + (number - 1);
    let end = ((page + 1) * page_size).min(count);
    (index >= start && index < end).then_some(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maps(n: usize) -> Vec<MapEntry> {
        (0..n)
            .map(|i| MapEntry::new(format!("id{}", i), format!("Map {}", i)))
            .collect()
    }

    #[test]
    fn test_page_arithmetic() {
        assert_eq!(total_pages(13, 6), 3);
        assert_eq!(total_pages(12, 6), 2);
        assert_eq!(total_pages(1, 6), 1);
        assert_eq!(page_index(0, 6, 6, 13), Some(5));
        assert_eq!(page_index(0, 6, 7, 13), None);
        assert_eq!(page_index(2, 6, 1, 13), Some(12));
        assert_eq!(page_index(2, 6, 2, 13), None);
        assert_eq!(page_index(0, 6, 0, 13), None);
    }

    #[test]
    fn test_pagination_wraps() {
        let mut menu = SelectionMenu::new(SelectionFlow::Nominate, 6);
        let OpenOutcome::Opened(first) = menu.open(1, maps(13), false) else {
            panic!("expected menu");
        };
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.items.len(), 6);

        assert!(matches!(menu.input(1, "0"), MenuInput::Page(p) if p.page == 1));
        let MenuInput::Page(last) = menu.input(1, "0") else {
            panic!("expected page");
        };
        assert_eq!(last.page, 2);
        assert_eq!(last.items.len(), 1);

        let MenuInput::Page(wrapped) = menu.input(1, "0") else {
            panic!("expected page");
        };
        assert_eq!(wrapped.page, 0);
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut menu = SelectionMenu::new(SelectionFlow::Nominate, 6);
        menu.open(1, maps(13), false);

        assert_eq!(menu.input(1, "7"), MenuInput::Ignored);
        assert_eq!(menu.input(1, "rtv"), MenuInput::Ignored);
        assert!(menu.is_open(1));
    }

    #[test]
    fn test_select_on_later_page() {
        let mut menu = SelectionMenu::new(SelectionFlow::Forcemap, 6);
        menu.open(1, maps(13), false);
        menu.input(1, "0");

        assert_eq!(
            menu.input(1, "2"),
            MenuInput::Selected(MapEntry::new("id7", "Map 7"))
        );
        assert!(!menu.is_open(1));
    }

    #[test]
    fn test_cancel_destroys_session() {
        let mut menu = SelectionMenu::new(SelectionFlow::Nominate, 6);
        menu.open(1, maps(3), false);
        assert_eq!(menu.input(1, "CANCEL"), MenuInput::Cancelled);
        assert!(!menu.is_open(1));
        assert_eq!(menu.input(1, "1"), MenuInput::Ignored);
    }

    #[test]
    fn test_single_filtered_match_short_circuits() {
        let mut menu = SelectionMenu::new(SelectionFlow::Nominate, 6);
        assert_eq!(
            menu.open(1, maps(1), true),
            OpenOutcome::Immediate(MapEntry::new("id0", "Map 0"))
        );
        assert!(!menu.is_open(1));

        // Without a filter, a lone candidate still gets a menu
        assert!(matches!(menu.open(1, maps(1), false), OpenOutcome::Opened(_)));
        assert!(menu.is_open(1));
    }

    #[test]
    fn test_empty_candidates() {
        let mut menu = SelectionMenu::new(SelectionFlow::Nominate, 6);
        assert_eq!(menu.open(1, Vec::new(), true), OpenOutcome::Empty);
        assert!(menu.is_empty());
    }

    #[test]
    fn test_render_lines() {
        let mut menu = SelectionMenu::new(SelectionFlow::Forcemap, 2);
        let OpenOutcome::Opened(page) = menu.open(9, maps(3), false) else {
            panic!("expected menu");
        };
        assert_eq!(
            page.render(),
            vec![
                "[Forcemap] Page 1/2. Type number to select (or 'cancel'):".to_string(),
                "[1] Map 0".to_string(),
                "[2] Map 1".to_string(),
                "[0] Next Page".to_string(),
            ]
        );
    }
}
