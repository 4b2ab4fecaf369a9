//! Chosen access plans and their EXPLAIN rendering.

use common::pretty::{render_structured_rows, TableStyleKind};
use tabled::Tabled;

use crate::range_seq::QuickRange;

/// Scan of one index over a list of ranges.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeReadPlan {
    pub keynr: usize,
    pub key_name: String,
    pub ranges: Vec<QuickRange>,
    pub used_key_parts: usize,
    pub max_used_key_length: u32,
    pub records: u64,
    pub read_cost: f64,
    /// Rows come back in rowid order.
    pub is_ror: bool,
    /// The index alone holds every column the query needs.
    pub covering: bool,
}

/// Rowid-ordered intersection of several range scans.
#[derive(Clone, Debug, PartialEq)]
pub struct RorIntersectReadPlan {
    pub scans: Vec<RangeReadPlan>,
    /// Clustered primary key scan used only to filter rowids.
    pub cpk_scan: Option<RangeReadPlan>,
    pub is_covering: bool,
    pub records: u64,
    pub read_cost: f64,
    /// Cost of the index passes alone, without fetching rows.
    pub index_scan_costs: f64,
}

/// Rowid-ordered union of rowid-ordered children.
#[derive(Clone, Debug, PartialEq)]
pub struct RorUnionReadPlan {
    pub children: Vec<TableReadPlan>,
    pub records: u64,
    pub read_cost: f64,
}

/// Sort-union: collect rowids from every scan, dedupe, fetch in rowid order.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexMergeReadPlan {
    pub range_scans: Vec<RangeReadPlan>,
    pub records: u64,
    pub read_cost: f64,
}

/// Loose index scan computing per-group MIN/MAX.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupMinMaxReadPlan {
    pub keynr: usize,
    pub key_name: String,
    /// Leading key parts that form the group.
    pub group_prefix_len: usize,
    /// Constant values of the key parts between the group and the MIN/MAX column.
    pub key_infix: Vec<types::Value>,
    /// Key part of the MIN/MAX column, if any.
    pub min_max_part: Option<usize>,
    /// Ranges on the MIN/MAX column, in key order.
    pub min_max_ranges: Vec<crate::sel_arg::Interval>,
    pub have_min: bool,
    pub have_max: bool,
    pub max_used_key_length: u32,
    pub records: u64,
    pub read_cost: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableReadPlan {
    Range(RangeReadPlan),
    RorIntersect(RorIntersectReadPlan),
    RorUnion(RorUnionReadPlan),
    IndexMerge(IndexMergeReadPlan),
    GroupMinMax(GroupMinMaxReadPlan),
}

impl TableReadPlan {
    pub fn read_cost(&self) -> f64 {
        match self {
            TableReadPlan::Range(p) => p.read_cost,
            TableReadPlan::RorIntersect(p) => p.read_cost,
            TableReadPlan::RorUnion(p) => p.read_cost,
            TableReadPlan::IndexMerge(p) => p.read_cost,
            TableReadPlan::GroupMinMax(p) => p.read_cost,
        }
    }

    pub fn records(&self) -> u64 {
        match self {
            TableReadPlan::Range(p) => p.records,
            TableReadPlan::RorIntersect(p) => p.records,
            TableReadPlan::RorUnion(p) => p.records,
            TableReadPlan::IndexMerge(p) => p.records,
            TableReadPlan::GroupMinMax(p) => p.records,
        }
    }

    /// True when the plan produces rows in rowid order.
    pub fn is_ror(&self) -> bool {
        match self {
            TableReadPlan::Range(p) => p.is_ror,
            TableReadPlan::RorIntersect(_) | TableReadPlan::RorUnion(_) => true,
            TableReadPlan::IndexMerge(_) | TableReadPlan::GroupMinMax(_) => false,
        }
    }

    /// Access type shown in EXPLAIN.
    pub fn access_type(&self) -> &'static str {
        match self {
            TableReadPlan::Range(_) | TableReadPlan::GroupMinMax(_) => "range",
            _ => "index_merge",
        }
    }

    /// Key column of EXPLAIN: the index name, or the composition of a merge.
    pub fn key_description(&self) -> String {
        match self {
            TableReadPlan::Range(p) => p.key_name.clone(),
            TableReadPlan::RorIntersect(p) => {
                let mut names: Vec<&str> = p.scans.iter().map(|s| s.key_name.as_str()).collect();
                if let Some(cpk) = &p.cpk_scan {
                    names.push(&cpk.key_name);
                }
                format!("intersect({})", names.join(","))
            }
            TableReadPlan::RorUnion(p) => {
                let children: Vec<String> =
                    p.children.iter().map(TableReadPlan::key_description).collect();
                format!("union({})", children.join(","))
            }
            TableReadPlan::IndexMerge(p) => {
                let names: Vec<&str> = p.range_scans.iter().map(|s| s.key_name.as_str()).collect();
                format!("sort_union({})", names.join(","))
            }
            TableReadPlan::GroupMinMax(p) => p.key_name.clone(),
        }
    }

    /// Key length column of EXPLAIN.
    pub fn key_len(&self) -> String {
        match self {
            TableReadPlan::Range(p) => p.max_used_key_length.to_string(),
            TableReadPlan::GroupMinMax(p) => p.max_used_key_length.to_string(),
            TableReadPlan::RorIntersect(p) => p
                .scans
                .iter()
                .chain(&p.cpk_scan)
                .map(|s| s.max_used_key_length.to_string())
                .collect::<Vec<_>>()
                .join(","),
            TableReadPlan::RorUnion(p) => p
                .children
                .iter()
                .map(TableReadPlan::key_len)
                .collect::<Vec<_>>()
                .join(","),
            TableReadPlan::IndexMerge(p) => p
                .range_scans
                .iter()
                .map(|s| s.max_used_key_length.to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    fn extra(&self) -> String {
        match self {
            TableReadPlan::Range(p) if p.covering => "Using where; Using index".into(),
            TableReadPlan::RorIntersect(p) if p.is_covering => {
                format!("Using {}; Using where; Using index", self.key_description())
            }
            TableReadPlan::Range(_) => "Using where".into(),
            TableReadPlan::RorIntersect(_)
            | TableReadPlan::RorUnion(_)
            | TableReadPlan::IndexMerge(_) => {
                format!("Using {}; Using where", self.key_description())
            }
            TableReadPlan::GroupMinMax(_) => "Using index for group-by".into(),
        }
    }
}

/// Outcome of access path selection.
#[derive(Clone, Debug, PartialEq)]
pub enum PlanChoice {
    /// Read every row and filter.
    TableScan,
    /// The predicate selects no rows; nothing needs to be read.
    Impossible,
    Plan(TableReadPlan),
}

/// One line of EXPLAIN output.
#[derive(Clone, Debug, PartialEq, Tabled)]
pub struct ExplainRow {
    pub table: String,
    #[tabled(rename = "type")]
    pub access_type: String,
    pub key: String,
    pub key_len: String,
    pub rows: u64,
    #[tabled(rename = "Extra")]
    pub extra: String,
}

/// Describe the chosen plan for `table`.
pub fn explain(table: &str, choice: &PlanChoice, table_rows: u64) -> ExplainRow {
    match choice {
        PlanChoice::TableScan => ExplainRow {
            table: table.into(),
            access_type: "ALL".into(),
            key: String::new(),
            key_len: String::new(),
            rows: table_rows,
            extra: "Using where".into(),
        },
        PlanChoice::Impossible => ExplainRow {
            table: table.into(),
            access_type: String::new(),
            key: String::new(),
            key_len: String::new(),
            rows: 0,
            extra: "Impossible WHERE".into(),
        },
        PlanChoice::Plan(plan) => ExplainRow {
            table: table.into(),
            access_type: plan.access_type().into(),
            key: plan.key_description(),
            key_len: plan.key_len(),
            rows: plan.records(),
            extra: plan.extra(),
        },
    }
}

/// EXPLAIN rows as a text table.
pub fn render_explain(rows: &[ExplainRow], style: TableStyleKind) -> String {
    render_structured_rows(rows, style)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn range(name: &str, records: u64) -> RangeReadPlan {
        RangeReadPlan {
            keynr: 0,
            key_name: name.into(),
            ranges: Vec::new(),
            used_key_parts: 1,
            max_used_key_length: 8,
            records,
            read_cost: records as f64,
            is_ror: true,
            covering: false,
        }
    }

    #[test]
    fn merge_plans_describe_their_members() {
        let intersect = TableReadPlan::RorIntersect(RorIntersectReadPlan {
            scans: vec![range("i_a", 10), range("i_b", 20)],
            cpk_scan: Some(range("PRIMARY", 5)),
            is_covering: false,
            records: 3,
            read_cost: 7.0,
            index_scan_costs: 4.0,
        });
        assert_eq!(intersect.key_description(), "intersect(i_a,i_b,PRIMARY)");
        assert_eq!(intersect.key_len(), "8,8,8");

        let union = TableReadPlan::RorUnion(RorUnionReadPlan {
            children: vec![TableReadPlan::Range(range("i_c", 1)), intersect],
            records: 4,
            read_cost: 9.0,
        });
        assert_eq!(union.key_description(), "union(i_c,intersect(i_a,i_b,PRIMARY))");
        assert!(union.is_ror());

        let sort_union = TableReadPlan::IndexMerge(IndexMergeReadPlan {
            range_scans: vec![range("i_a", 10), range("i_b", 20)],
            records: 30,
            read_cost: 40.0,
        });
        let row = explain("t", &PlanChoice::Plan(sort_union), 100);
        assert_eq!(row.access_type, "index_merge");
        assert_eq!(row.key, "sort_union(i_a,i_b)");
        assert_eq!(row.extra, "Using sort_union(i_a,i_b); Using where");
        assert_eq!(row.rows, 30);
    }

    #[test]
    fn explain_table_renders_headers() {
        let rows = vec![
            explain("t", &PlanChoice::TableScan, 40),
            explain("t", &PlanChoice::Impossible, 40),
        ];
        let text = render_explain(&rows, TableStyleKind::Ascii);
        assert!(text.contains("key_len"));
        assert!(text.contains("Extra"));
        assert!(text.contains("ALL"));
        assert!(text.contains("Impossible WHERE"));
    }
}
