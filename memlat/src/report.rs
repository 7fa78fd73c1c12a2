use comfy_table::{presets::UTF8_FULL_CONDENSED, CellAlignment, Table};
use num_format::{Locale, ToFormattedString};
use pmu_data::{LocalityClass, SampleRecord};
use serde::Serialize;

use crate::aggregate::Aggregate;

const UNDEFINED: &str = "undefined";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterLine {
    pub name: String,
    pub description: String,
    pub value: u64,
    pub expected: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleSummary {
    pub captured: usize,
    pub expected: u64,
    /// Samples the kernel dropped
    pub lost: u64,
    /// Non-sample records in the ring buffer
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleLine {
    pub ip: u64,
    pub addr: u64,
    pub in_workload: bool,
    pub weight: u64,
    pub level: String,
    pub snoop: String,
    pub tlb: String,
}

impl SampleLine {
    pub fn new(sample: &SampleRecord, start: u64, end: u64) -> Self {
        SampleLine {
            ip: sample.ip,
            addr: sample.addr,
            in_workload: sample.addr >= start && sample.addr <= end,
            weight: sample.weight,
            level: sample.level_description(),
            snoop: sample.snoop().to_string(),
            tlb: sample.tlb_description(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub core: usize,
    pub memory_node: u32,
    /// Node of `core`, when the topology could be read
    pub core_node: Option<u32>,
    pub pattern: String,
    pub size: usize,
    pub elements: usize,
    pub period: u64,
    pub elapsed_ms: f64,
    pub cpu_ghz: Option<f64>,
    pub counters: Vec<CounterLine>,
    pub samples: SampleSummary,
    pub aggregate: Aggregate,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub listing: Vec<SampleLine>,
}

impl Report {
    pub fn locality(&self) -> &'static str {
        match self.core_node {
            Some(node) if node == self.memory_node => "local",
            Some(_) => "remote",
            None => "unknown",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!(
            "core {} / memory node {} ({}), {} walk over {} bytes ({} elements), sampling period {}\n\n",
            self.core,
            self.memory_node,
            self.locality(),
            self.pattern,
            self.size.to_formatted_string(&Locale::en),
            self.elements.to_formatted_string(&Locale::en),
            self.period.to_formatted_string(&Locale::en),
        ));

        out.push_str(&self.counters_table().to_string());
        out.push('\n');

        if !self.listing.is_empty() {
            out.push('\n');
            out.push_str(&self.listing_table().to_string());
            out.push('\n');
        }

        section(&mut out, "Where are the samples", self.regions_table());
        section(&mut out, "In which level of memory", self.levels_table());
        section(&mut out, "Average latencies", self.latency_table());

        let unclassified = self.aggregate.unclassified.len();
        if unclassified > 0 {
            out.push_str(&format!(
                "\n{unclassified} samples matched no single locality class and are not counted above\n"
            ));
        }

        out
    }

    fn counters_table(&self) -> Table {
        let mut table = new_table(&["Counter", "Value", "Expected"]);

        table.add_row(vec![
            "time (milliseconds)".to_owned(),
            format!("{:.3}", self.elapsed_ms),
            String::new(),
        ]);

        for counter in &self.counters {
            table.add_row(vec![
                counter.description.clone(),
                counter.value.to_formatted_string(&Locale::en),
                counter
                    .expected
                    .map(|expected| expected.to_formatted_string(&Locale::en))
                    .unwrap_or_default(),
            ]);
        }

        table.add_row(vec![
            "samples count".to_owned(),
            self.samples.captured.to_formatted_string(&Locale::en),
            self.samples.expected.to_formatted_string(&Locale::en),
        ]);

        if self.samples.lost > 0 {
            table.add_row(vec![
                "samples lost by the kernel".to_owned(),
                self.samples.lost.to_formatted_string(&Locale::en),
                String::new(),
            ]);
        }

        right_align(&mut table, &[1, 2]);
        table
    }

    fn regions_table(&self) -> Table {
        let mut table = new_table(&["Range of the buffer", "Samples", "Share"]);
        let regions = &self.aggregate.regions;

        for (name, count) in [
            ("whole buffer", regions.full),
            ("first half", regions.half),
            ("first third", regions.third),
            ("first quarter", regions.quarter),
        ] {
            table.add_row(vec![
                name.to_owned(),
                count.to_formatted_string(&Locale::en),
                percent(self.aggregate.share(count)),
            ]);
        }

        right_align(&mut table, &[1, 2]);
        table
    }

    fn levels_table(&self) -> Table {
        let mut table = new_table(&["Served from", "Samples", "Share"]);

        for class in &self.aggregate.classes {
            table.add_row(vec![
                class.class.name().to_owned(),
                class.count.to_formatted_string(&Locale::en),
                percent(class.percent),
            ]);
        }

        right_align(&mut table, &[1, 2]);
        table
    }

    fn latency_table(&self) -> Table {
        let mut table = new_table(&["Loads", "Average latency"]);
        let latency = &self.aggregate.latency;

        for (name, cycles) in [
            ("all", latency.overall),
            (LocalityClass::LocalMemory.name(), latency.local_memory),
            (LocalityClass::RemoteMemory.name(), latency.remote_memory),
        ] {
            table.add_row(vec![name.to_owned(), format_latency(cycles, self.cpu_ghz)]);
        }

        right_align(&mut table, &[1]);
        table
    }

    fn listing_table(&self) -> Table {
        let mut table = new_table(&["IP", "Address", "Buffer", "Weight", "Level", "Snoop", "TLB"]);

        for line in &self.listing {
            table.add_row(vec![
                format!("{:#x}", line.ip),
                format!("{:#x}", line.addr),
                if line.in_workload { "in" } else { "out" }.to_owned(),
                line.weight.to_string(),
                line.level.clone(),
                line.snoop.clone(),
                line.tlb.clone(),
            ]);
        }

        right_align(&mut table, &[3]);
        table
    }
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(header.to_vec());
    table
}

fn right_align(table: &mut Table, columns: &[usize]) {
    for &index in columns {
        if let Some(column) = table.column_mut(index) {
            column.set_cell_alignment(CellAlignment::Right);
        }
    }
}

fn section(out: &mut String, title: &str, table: Table) {
    out.push_str(&format!("\n{title}\n{table}\n"));
}

fn percent(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.3}%"),
        None => UNDEFINED.to_owned(),
    }
}

fn format_latency(cycles: Option<f64>, cpu_ghz: Option<f64>) -> String {
    match (cycles, cpu_ghz) {
        (None, _) => UNDEFINED.to_owned(),
        (Some(cycles), None) => format!("{cycles:.2} cycles"),
        (Some(cycles), Some(ghz)) => format!("{:.2} ns ({cycles:.2} cycles)", cycles / ghz),
    }
}
