use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::dataset::Table;
use crate::db::{self, FaxRow};
use crate::error::{ApiError, ApiResult};
use crate::llm::LanguageModel;
use crate::retry::{with_backoff, Backoff};

const FAX_LABEL: &str = r"(?i)(?:fax|télécopieur|telecopieur)(?:\s*:|\s*number|\s*#|\s*is|\s*at)?\s*";

static FAX_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(\+?1?[-.\s]?(?:\(?\d{3}\)?[-.\s]?)?\d{3}[-.\s]?\d{4})",
        r"(\(\d{3}\)\s*\d{3}[-.\s]?\d{4})",
        r"(\d{10})",
    ]
    .iter()
    .map(|num| Regex::new(&format!("{}{}", FAX_LABEL, num)).unwrap())
    .collect()
});
static NON_DIGIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\D").unwrap());

const DEFAULT_KEYWORD: &str = "general";

const EXTRACT_SYSTEM: &str = "You are an expert at identifying fax numbers in text.";
const KEYWORD_SYSTEM: &str = "You are an expert at analyzing healthcare information.";

/// Normalise a North-American number to `XXX-XXX-XXXX`.
pub fn normalize_number(raw: &str) -> Option<String> {
    let digits = NON_DIGIT_RE.replace_all(raw, "");
    let digits = match digits.len() {
        10 => &digits[..],
        11 if digits.starts_with('1') => &digits[1..],
        _ => return None,
    };
    Some(format!("{}-{}-{}", &digits[..3], &digits[3..6], &digits[6..]))
}

fn push_unique(list: &mut Vec<String>, n: String) {
    if !list.contains(&n) {
        list.push(n);
    }
}

/// Fax numbers introduced by a fax label, in order of appearance.
pub fn extract_fax_numbers(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for re in FAX_RES.iter() {
        for caps in re.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                if let Some(n) = normalize_number(m.as_str()) {
                    found.push((m.start(), n));
                }
            }
        }
    }
    found.sort_by_key(|(pos, _)| *pos);

    let mut out = Vec::new();
    for (_, n) in found {
        push_unique(&mut out, n);
    }
    out
}

fn strip_fences(reply: &str) -> &str {
    let t = reply.trim();
    let t = t.strip_prefix("```json").or_else(|| t.strip_prefix("```")).unwrap_or(t);
    t.strip_suffix("```").unwrap_or(t).trim()
}

/// Numbers from the second model pass. Falls back to the regex harvest
/// when the reply is not a JSON array.
pub fn parse_model_numbers(reply: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(strip_fences(reply)) {
        Ok(list) => {
            let mut out = Vec::new();
            for n in list.iter().filter_map(|n| normalize_number(n)) {
                push_unique(&mut out, n);
            }
            out
        }
        Err(_) => extract_fax_numbers(reply),
    }
}

/// Keyword per number; anything missing or unparsable becomes `general`.
pub fn parse_keywords(reply: &str, numbers: &[String]) -> BTreeMap<String, String> {
    let parsed: BTreeMap<String, String> =
        serde_json::from_str(strip_fences(reply)).unwrap_or_default();
    numbers
        .iter()
        .map(|n| {
            let kw = parsed
                .get(n)
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| DEFAULT_KEYWORD.to_string());
            (n.clone(), kw)
        })
        .collect()
}

pub fn search_queries(name: &str, address: &str, website: &str) -> Vec<String> {
    const ASK: &str = "For each fax number, specify which department it belongs to and what it's used for.";
    let mut queries = Vec::new();
    if !website.trim().is_empty() {
        queries.push(format!(
            "Find the fax number for {} located at {}. Their website is {}. Please search the website and any other sources to find all fax numbers for this healthcare establishment. {}",
            name, address, website, ASK
        ));
    }
    queries.push(format!(
        "Find the fax number for {} located at {} in Quebec, Canada. Please search for all fax numbers for this healthcare establishment. {}",
        name, address, ASK
    ));
    queries.push(format!(
        "Find the fax number for {} healthcare establishment in Quebec, Canada. Please search for all fax numbers. {}",
        name, ASK
    ));
    queries
}

fn extract_prompt(text: &str) -> String {
    format!(
        "Please analyze the following text and extract all fax numbers.\n\
         Focus specifically on identifying fax numbers (not phone numbers) for healthcare establishments.\n\
         Look for patterns like \"Fax: XXX-XXX-XXXX\", \"Télécopieur: XXX-XXX-XXXX\", \"Fax number is XXX-XXX-XXXX\".\n\
         Return ONLY a JSON array of fax numbers in the format [\"XXX-XXX-XXXX\"]. If none are found, return [].\n\n\
         Text to analyze:\n{}",
        text
    )
}

fn keyword_prompt(text: &str, numbers: &[String]) -> String {
    format!(
        "I have found the following fax numbers for a healthcare establishment: {}\n\
         Based on the following text, assign ONE keyword to each fax number that best describes its purpose or department.\n\
         Choose from keywords like: general, emergency, radiology, cardiology, pediatrics, surgery, laboratory, billing, \
         records, appointments, referrals, pharmacy, administration.\n\
         If you can't determine a specific purpose, use \"general\".\n\
         Return a JSON object where keys are fax numbers and values are single keywords, e.g. {{\"819-123-4567\": \"radiology\"}}.\n\n\
         Text to analyze:\n{}",
        numbers.join(", "),
        text
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaxFinding {
    pub numbers: Vec<String>,
    pub keywords: BTreeMap<String, String>,
}

impl FaxFinding {
    fn known(fax: &str) -> Self {
        let fax = fax.trim().to_string();
        FaxFinding {
            keywords: BTreeMap::from([(fax.clone(), DEFAULT_KEYWORD.to_string())]),
            numbers: vec![fax],
        }
    }

    fn to_row(&self, code: &str) -> Result<FaxRow> {
        Ok(FaxRow {
            code: code.to_string(),
            fax_numbers: serde_json::to_string(&self.numbers)?,
            fax_keywords: serde_json::to_string(&self.keywords)?,
        })
    }

    fn from_row(row: &FaxRow) -> Self {
        FaxFinding {
            numbers: serde_json::from_str(&row.fax_numbers).unwrap_or_default(),
            keywords: serde_json::from_str(&row.fax_keywords).unwrap_or_default(),
        }
    }
}

pub struct FaxOptions {
    pub limit: Option<usize>,
    /// Pause between queries for the same establishment.
    pub query_pause: Duration,
    /// Pause between establishments that needed a search.
    pub row_pause: Duration,
    pub backoff: Backoff,
}

impl Default for FaxOptions {
    fn default() -> Self {
        FaxOptions {
            limit: None,
            query_pause: Duration::from_secs(2),
            row_pause: Duration::from_secs(3),
            backoff: Backoff::default(),
        }
    }
}

/// Run the query cascade for one establishment. A failed model call moves
/// on to the next query; if nothing is found and some call failed, the last
/// error is returned so the establishment is searched again next run.
pub async fn find_fax(
    model: &dyn LanguageModel,
    name: &str,
    address: &str,
    website: &str,
    opts: &FaxOptions,
) -> ApiResult<FaxFinding> {
    let mut numbers: Vec<String> = Vec::new();
    let mut last_result = String::new();
    let mut last_error: Option<ApiError> = None;

    for (i, query) in search_queries(name, address, website).iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(opts.query_pause).await;
        }
        debug!("Searching: {}", query);

        let result = match with_backoff(name, opts.backoff, || model.web_search(query)).await {
            Ok(r) if !r.trim().is_empty() => r,
            Ok(_) => continue,
            Err(e) => {
                warn!("Web search failed for {}: {}", name, e);
                last_error = Some(e);
                continue;
            }
        };

        for n in extract_fax_numbers(&result) {
            push_unique(&mut numbers, n);
        }

        let prompt = extract_prompt(&result);
        match with_backoff(name, opts.backoff, || model.complete(EXTRACT_SYSTEM, &prompt)).await {
            Ok(reply) => {
                for n in parse_model_numbers(&reply) {
                    push_unique(&mut numbers, n);
                }
            }
            Err(e) => {
                warn!("Fax extraction pass failed for {}: {}", name, e);
                last_error = Some(e);
            }
        }

        last_result = result;
        if !numbers.is_empty() {
            break;
        }
    }

    if numbers.is_empty() {
        return match last_error {
            Some(e) => Err(e),
            None => Ok(FaxFinding::default()),
        };
    }

    let prompt = keyword_prompt(&last_result, &numbers);
    let reply = match with_backoff(name, opts.backoff, || model.complete(KEYWORD_SYSTEM, &prompt)).await {
        Ok(r) => r,
        Err(e) => {
            warn!("Keyword pass failed for {}: {}", name, e);
            String::new()
        }
    };
    let keywords = parse_keywords(&reply, &numbers);
    Ok(FaxFinding { numbers, keywords })
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FaxStats {
    pub processed: usize,
    pub searched: usize,
    pub with_fax: usize,
    pub numbers: usize,
    /// Searches cut short by API errors; not cached, retried next run.
    pub failed: usize,
}

/// Fill fax columns on the merged table. Searches are cached in the ledger
/// so an interrupted run resumes where it stopped.
pub async fn run_fax(
    conn: &Connection,
    model: &dyn LanguageModel,
    table: &mut Table,
    opts: &FaxOptions,
) -> Result<FaxStats> {
    let fax_col = table.ensure_column("fax_number");
    let enabled_col = table.ensure_column("is_fax_enabled");
    let found_col = table.ensure_column("found_fax_numbers");
    let keywords_col = table.ensure_column("fax_keywords");
    let code_col = table.column("code");

    let limit = opts.limit.unwrap_or(table.rows.len()).min(table.rows.len());
    let pb = ProgressBar::new(limit as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut stats = FaxStats::default();
    for idx in 0..limit {
        let row = &table.rows[idx];
        let code = code_col.map(|c| row[c].clone()).unwrap_or_default();
        let existing = row[fax_col].trim().to_string();

        let finding = if !existing.is_empty() {
            debug!("Fax number already exists for {}: {}", code, existing);
            FaxFinding::known(&existing)
        } else if let Some(cached) = db::fetch_fax(conn, &code)?.filter(|_| !code.is_empty()) {
            FaxFinding::from_row(&cached)
        } else {
            let name = table.get(row, "name").to_string();
            let address = table.get(row, "address").to_string();
            let website = table.get(row, "website").to_string();
            let finding = match find_fax(model, &name, &address, &website, opts).await {
                Ok(finding) => {
                    if !code.is_empty() {
                        db::save_fax(conn, &finding.to_row(&code)?)?;
                    }
                    finding
                }
                Err(e) => {
                    warn!("Fax search for {} left for a later run: {}", code, e);
                    stats.failed += 1;
                    FaxFinding::default()
                }
            };
            stats.searched += 1;
            if idx + 1 < limit {
                tokio::time::sleep(opts.row_pause).await;
            }
            finding
        };

        let row = &mut table.rows[idx];
        row[found_col] = serde_json::to_string(&finding.numbers)?;
        row[keywords_col] = serde_json::to_string(&finding.keywords)?;
        if let Some(first) = finding.numbers.first() {
            row[fax_col] = first.clone();
            row[enabled_col] = "1".to_string();
            stats.with_fax += 1;
            stats.numbers += finding.numbers.len();
        } else if row[enabled_col].is_empty() {
            row[enabled_col] = "0".to_string();
        }
        stats.processed += 1;
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Fax stage: {} processed, {} searched, {} with fax ({} numbers), {} failed",
        stats.processed, stats.searched, stats.with_fax, stats.numbers, stats.failed
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn normalizes_common_formats() {
        assert_eq!(normalize_number("(514) 555-0199").as_deref(), Some("514-555-0199"));
        assert_eq!(normalize_number("+1 819.555.0100").as_deref(), Some("819-555-0100"));
        assert_eq!(normalize_number("4185550000").as_deref(), Some("418-555-0000"));
        assert_eq!(normalize_number("555-0199"), None);
        assert_eq!(normalize_number("25141234567"), None);
    }

    #[test]
    fn harvests_only_labelled_numbers() {
        let text = "Téléphone : 514-555-0100. Fax: (514) 555-0199. \
                    Télécopieur 450 555 0123, fax number 1-819-555-0100. Fax: 514-555-0199";
        assert_eq!(
            extract_fax_numbers(text),
            vec!["514-555-0199", "450-555-0123", "819-555-0100"]
        );
        assert!(extract_fax_numbers("Phone 514-555-0100").is_empty());
    }

    #[test]
    fn model_reply_json_or_regex_fallback() {
        assert_eq!(
            parse_model_numbers("```json\n[\"514 555 0199\", \"bogus\"]\n```"),
            vec!["514-555-0199"]
        );
        assert_eq!(
            parse_model_numbers("The fax: 418-555-0000"),
            vec!["418-555-0000"]
        );
        assert!(parse_model_numbers("[]").is_empty());
    }

    #[test]
    fn keywords_default_to_general() {
        let nums = vec!["514-555-0199".to_string(), "514-555-0200".to_string()];
        let kw = parse_keywords(r#"{"514-555-0199": "Radiology"}"#, &nums);
        assert_eq!(kw["514-555-0199"], "radiology");
        assert_eq!(kw["514-555-0200"], "general");
        assert!(parse_keywords("not json", &nums).values().all(|k| k == "general"));
    }

    #[test]
    fn website_query_comes_first() {
        let q = search_queries("CLSC A", "1 Rue A", "https://clsc.example");
        assert_eq!(q.len(), 3);
        assert!(q[0].contains("Their website is https://clsc.example"));
        assert_eq!(search_queries("CLSC A", "1 Rue A", " ").len(), 2);
    }

    /// Answers web searches from a script in order; chat calls echo canned replies.
    struct ScriptedModel {
        searches: Mutex<Vec<ApiResult<String>>>,
        search_calls: Mutex<usize>,
        extract_reply: String,
        keyword_reply: String,
    }

    impl ScriptedModel {
        fn new(searches: Vec<ApiResult<String>>, extract_reply: &str, keyword_reply: &str) -> Self {
            ScriptedModel {
                searches: Mutex::new(searches),
                search_calls: Mutex::new(0),
                extract_reply: extract_reply.into(),
                keyword_reply: keyword_reply.into(),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn web_search(&self, _query: &str) -> ApiResult<String> {
            *self.search_calls.lock().unwrap() += 1;
            let mut s = self.searches.lock().unwrap();
            if s.is_empty() {
                Ok(String::new())
            } else {
                s.remove(0)
            }
        }

        async fn complete(&self, system: &str, _user: &str) -> ApiResult<String> {
            if system == EXTRACT_SYSTEM {
                Ok(self.extract_reply.clone())
            } else {
                Ok(self.keyword_reply.clone())
            }
        }
    }

    fn fast() -> FaxOptions {
        FaxOptions {
            limit: None,
            query_pause: Duration::ZERO,
            row_pause: Duration::ZERO,
            backoff: Backoff { max_retries: 1, base: Duration::from_millis(1) },
        }
    }

    #[tokio::test]
    async fn cascade_stops_at_first_hit() {
        let model = ScriptedModel::new(
            vec![
                Err(ApiError::Api("REQUEST_DENIED".into())),
                Ok("Fax: 514-555-0199".into()),
                Ok("Fax: 514-555-0000".into()),
            ],
            r#"["514-555-0199", "514-555-0300"]"#,
            r#"{"514-555-0300": "billing"}"#,
        );
        let f = find_fax(&model, "CLSC A", "1 Rue A", "", &fast()).await.unwrap();
        assert_eq!(f.numbers, vec!["514-555-0199", "514-555-0300"]);
        assert_eq!(f.keywords["514-555-0199"], "general");
        assert_eq!(f.keywords["514-555-0300"], "billing");
        assert_eq!(*model.search_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn nothing_found_is_empty() {
        let model = ScriptedModel::new(vec![], "[]", "{}");
        let f = find_fax(&model, "CLSC A", "1 Rue A", "", &fast()).await.unwrap();
        assert_eq!(f, FaxFinding::default());
        assert_eq!(*model.search_calls.lock().unwrap(), 2);
    }

    fn merged_table() -> Table {
        let headers = ["code", "name", "address", "website", "fax_number", "is_fax_enabled"];
        Table {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: vec![
                ["10001", "CLSC A", "1 Rue A", "", "", "0"].map(String::from).to_vec(),
                ["10002", "CLSC B", "2 Rue B", "", "450-555-0000", "0"].map(String::from).to_vec(),
                ["10003", "CLSC C", "3 Rue C", "", "", "0"].map(String::from).to_vec(),
            ],
        }
    }

    #[tokio::test]
    async fn run_fills_columns_and_caches_searches() {
        let conn = db::memory();
        let model = ScriptedModel::new(
            vec![Ok("Télécopieur: 514-555-0199".into())],
            "[]",
            r#"{"514-555-0199": "emergency"}"#,
        );
        let mut table = merged_table();
        let opts = FaxOptions { limit: Some(2), ..fast() };
        let stats = run_fax(&conn, &model, &mut table, &opts).await.unwrap();

        assert_eq!(stats, FaxStats { processed: 2, searched: 1, with_fax: 2, numbers: 2, failed: 0 });
        let a = &table.rows[0];
        assert_eq!(table.get(a, "fax_number"), "514-555-0199");
        assert_eq!(table.get(a, "is_fax_enabled"), "1");
        assert_eq!(table.get(a, "found_fax_numbers"), r#"["514-555-0199"]"#);
        assert_eq!(table.get(a, "fax_keywords"), r#"{"514-555-0199":"emergency"}"#);

        let b = &table.rows[1];
        assert_eq!(table.get(b, "fax_keywords"), r#"{"450-555-0000":"general"}"#);
        // beyond the limit: kept, untouched
        assert_eq!(table.get(&table.rows[2], "found_fax_numbers"), "");

        // second run reuses the ledger instead of searching again
        let silent = ScriptedModel::new(vec![], "[]", "{}");
        let mut again = merged_table();
        run_fax(&conn, &silent, &mut again, &opts).await.unwrap();
        assert_eq!(*silent.search_calls.lock().unwrap(), 0);
        assert_eq!(again.get(&again.rows[0], "fax_number"), "514-555-0199");
    }

    /// Every call fails the way a rate-limited or unavailable API does.
    struct UnavailableModel;

    #[async_trait]
    impl LanguageModel for UnavailableModel {
        async fn web_search(&self, _query: &str) -> ApiResult<String> {
            Err(ApiError::Status { status: 503, body: String::new() })
        }

        async fn complete(&self, _system: &str, _user: &str) -> ApiResult<String> {
            Err(ApiError::Status { status: 503, body: String::new() })
        }
    }

    #[tokio::test]
    async fn all_queries_failing_is_an_error() {
        let f = find_fax(&UnavailableModel, "CLSC A", "1 Rue A", "", &fast()).await;
        assert!(matches!(f, Err(ApiError::Status { status: 503, .. })));
    }

    #[tokio::test]
    async fn outage_is_retried_on_next_run() {
        let conn = db::memory();
        let opts = FaxOptions { limit: Some(1), ..fast() };

        let mut table = merged_table();
        let stats = run_fax(&conn, &UnavailableModel, &mut table, &opts).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(table.get(&table.rows[0], "fax_number"), "");
        assert!(db::fetch_fax(&conn, "10001").unwrap().is_none());

        let model = ScriptedModel::new(vec![Ok("Fax: 514-555-0199".into())], "[]", "{}");
        let mut table = merged_table();
        let stats = run_fax(&conn, &model, &mut table, &opts).await.unwrap();
        assert_eq!(stats.searched, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(*model.search_calls.lock().unwrap(), 1);
        assert_eq!(table.get(&table.rows[0], "fax_number"), "514-555-0199");
        assert!(db::fetch_fax(&conn, "10001").unwrap().is_some());
    }
}
