use crate::dataset::Table;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TableSummary {
    pub rows: usize,
    /// Rows per region, in order of first appearance.
    pub regions: Vec<(String, usize)>,
    /// `None` when the table has no `id` column (not merged yet).
    pub enriched: Option<usize>,
    pub fax_enabled: Option<usize>,
}

fn count_set(table: &Table, column: &str, pred: impl Fn(&str) -> bool) -> Option<usize> {
    let idx = table.column(column)?;
    Some(table.rows.iter().filter(|r| pred(r[idx].trim())).count())
}

pub fn summarize(table: &Table) -> TableSummary {
    let mut regions: Vec<(String, usize)> = Vec::new();
    if let Some(idx) = table.column("region") {
        for row in &table.rows {
            let region = &row[idx];
            match regions.iter_mut().find(|(r, _)| r == region) {
                Some((_, n)) => *n += 1,
                None => regions.push((region.clone(), 1)),
            }
        }
    }

    TableSummary {
        rows: table.rows.len(),
        regions,
        enriched: count_set(table, "id", |v| !v.is_empty()),
        fax_enabled: count_set(table, "is_fax_enabled", |v| v == "1"),
    }
}

impl TableSummary {
    pub fn print(&self) {
        println!("Rows:        {}", self.rows);
        if let Some(n) = self.enriched {
            println!("Enriched:    {}", n);
        }
        if let Some(n) = self.fax_enabled {
            println!("Fax enabled: {}", n);
        }
        if !self.regions.is_empty() {
            println!("\n{:<32} | {:>5}", "Region", "Rows");
            println!("{}", "-".repeat(40));
            for (region, n) in &self.regions {
                println!("{:<32} | {:>5}", region, n);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeGap {
    pub before: u64,
    pub after: u64,
}

impl CodeGap {
    /// Codes missing between the two neighbours.
    pub fn size(&self) -> u64 {
        self.after - self.before - 1
    }
}

/// Consecutive numeric codes further apart than `threshold`. Codes that are
/// not purely numeric (the `X` check-digit variants) are ignored.
pub fn find_gaps<'a>(codes: impl IntoIterator<Item = &'a str>, threshold: u64) -> Vec<CodeGap> {
    let mut nums: Vec<u64> = codes
        .into_iter()
        .filter_map(|c| c.trim().parse().ok())
        .collect();
    nums.sort_unstable();
    nums.dedup();

    nums.windows(2)
        .filter(|w| w[1] - w[0] > threshold)
        .map(|w| CodeGap { before: w[0], after: w[1] })
        .collect()
}

/// Codes of a pipeline table, read from `ramq_id` or else `code`.
pub fn table_codes(table: &Table) -> Vec<&str> {
    let Some(idx) = table.column("ramq_id").or_else(|| table.column("code")) else {
        return Vec::new();
    };
    table.rows.iter().map(|r| r[idx].as_str()).collect()
}
