/// Simple localization support for the lexivault CLI.
/// Locale can be selected via the `--locale` CLI flag (e.g. `--locale uk`).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Uk,
}

impl Locale {
    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "uk" | "uk-ua" | "uk_ua" => Self::Uk,
            _ => Self::En,
        }
    }
}

pub struct Messages {
    pub catalog_header: &'static str,
    pub status_offline: &'static str,
    pub status_remote: &'static str,
    pub status_update: &'static str,
    pub download_started: &'static str,
    pub download_finished: &'static str,
    pub download_cancelled: &'static str,
    pub deleted: &'static str,
    pub not_found: &'static str,
    pub no_suggestions: &'static str,
    pub cache_refreshed: &'static str,
    pub pack_written: &'static str,
    pub size_unknown: &'static str,
    pub error_prefix: &'static str,
    pub info_prefix: &'static str,
}

pub static EN: Messages = Messages {
    catalog_header: "Dictionaries",
    status_offline: "offline",
    status_remote: "remote",
    status_update: "update available",
    download_started: "Download started",
    download_finished: "Download finished",
    download_cancelled: "Download cancelled",
    deleted: "deleted",
    not_found: "not found",
    no_suggestions: "no suggestions",
    cache_refreshed: "Local cache refreshed",
    pack_written: "Dictionary pack written",
    size_unknown: "?",
    error_prefix: "ERR",
    info_prefix: "INFO",
};

pub static UK: Messages = Messages {
    catalog_header: "Словники",
    status_offline: "офлайн",
    status_remote: "віддалений",
    status_update: "доступне оновлення",
    download_started: "Завантаження розпочато",
    download_finished: "Завантаження завершено",
    download_cancelled: "Завантаження скасовано",
    deleted: "видалено",
    not_found: "не знайдено",
    no_suggestions: "немає підказок",
    cache_refreshed: "Локальний кеш оновлено",
    pack_written: "Пакет словника записано",
    size_unknown: "?",
    error_prefix: "ПОМИЛКА",
    info_prefix: "ІНФО",
};

pub fn get_messages(locale: Locale) -> &'static Messages {
    match locale {
        Locale::En => &EN,
        Locale::Uk => &UK,
    }
}
