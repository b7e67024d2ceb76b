use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TabId {
    Adjust,
    Finetune,
    Filters,
    Watermark,
    Annotate,
    Resize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tab {
    pub id: TabId,
    pub label_key: &'static str,
    hidden_in_cloudimage: bool,
}

impl Tab {
    pub fn is_hidden(&self, use_cloudimage: bool) -> bool {
        use_cloudimage && self.hidden_in_cloudimage
    }
}

pub const AVAILABLE_TABS: &[Tab] = &[
    Tab {
        id: TabId::Adjust,
        label_key: "adjustTab",
        hidden_in_cloudimage: false,
    },
    Tab {
        id: TabId::Finetune,
        label_key: "finetuneTab",
        hidden_in_cloudimage: true,
    },
    Tab {
        id: TabId::Filters,
        label_key: "filtersTab",
        hidden_in_cloudimage: true,
    },
    Tab {
        id: TabId::Watermark,
        label_key: "watermarkTab",
        hidden_in_cloudimage: false,
    },
    Tab {
        id: TabId::Annotate,
        label_key: "annotateTab",
        hidden_in_cloudimage: true,
    },
    Tab {
        id: TabId::Resize,
        label_key: "resizeTab",
        hidden_in_cloudimage: false,
    },
];

/// Tabs to show, in the order of `tabs_ids`. Falls back to every available
/// tab when none of the requested ids are known.
pub fn chosen_tabs(tabs_ids: &[TabId], use_cloudimage: bool) -> Vec<Tab> {
    let mut tabs: Vec<Tab> = Vec::with_capacity(AVAILABLE_TABS.len());
    for id in tabs_ids {
        if tabs.iter().any(|tab| tab.id == *id) {
            continue;
        }
        if let Some(tab) = AVAILABLE_TABS.iter().find(|tab| tab.id == *id) {
            tabs.push(*tab);
        }
    }
    if tabs.is_empty() {
        tabs.extend_from_slice(AVAILABLE_TABS);
    }
    tabs.retain(|tab| !tab.is_hidden(use_cloudimage));
    tabs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(tabs: &[Tab]) -> Vec<TabId> {
        tabs.iter().map(|t| t.id).collect()
    }

    #[test]
    fn keeps_configured_order_without_duplicates() {
        let tabs = chosen_tabs(
            &[TabId::Resize, TabId::Adjust, TabId::Resize],
            false,
        );
        assert_eq!(ids(&tabs), vec![TabId::Resize, TabId::Adjust]);
    }

    #[test]
    fn empty_selection_falls_back_to_all() {
        assert_eq!(chosen_tabs(&[], false).len(), AVAILABLE_TABS.len());
    }

    #[test]
    fn cloudimage_hides_pixel_tools() {
        let tabs = chosen_tabs(&[], true);
        assert_eq!(
            ids(&tabs),
            vec![TabId::Adjust, TabId::Watermark, TabId::Resize]
        );
    }
}
