/// Per-query execution details appended to responses while the connection
/// has DEBUG ON.
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub search_terms: Vec<String>,
    pub query_time_ms: f64,
    pub index_time_ms: f64,
    pub filter_time_ms: f64,
    pub total_candidates: usize,
    pub after_intersection: usize,
    pub after_not: usize,
    pub after_filters: usize,
    pub final_results: usize,
    pub optimization_used: String,
    pub order_by_applied: String,
    pub limit_applied: u32,
    pub offset_applied: u32,
    pub cache_status: CacheStatus,
    pub cache_age_ms: f64,
    pub cache_saved_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStatus {
    #[default]
    MissDisabled,
    MissNotFound,
    Hit,
}

impl DebugInfo {
    /// Renders the DEBUG block of a response.
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(format!("DEBUG query_time_ms={:.3}", self.query_time_ms));
        lines.push(format!("DEBUG index_time_ms={:.3}", self.index_time_ms));
        if self.filter_time_ms > 0.0 {
            lines.push(format!("DEBUG filter_time_ms={:.3}", self.filter_time_ms));
        }
        if !self.search_terms.is_empty() {
            lines.push(format!("DEBUG search_terms={}", self.search_terms.join(",")));
        }
        lines.push(format!(
            "DEBUG candidates={} after_intersection={} after_not={} after_filters={} final={}",
            self.total_candidates, self.after_intersection, self.after_not, self.after_filters, self.final_results
        ));
        if !self.optimization_used.is_empty() {
            lines.push(format!("DEBUG optimization={}", self.optimization_used));
        }
        if !self.order_by_applied.is_empty() {
            lines.push(format!(
                "DEBUG order_by={} limit={} offset={}",
                self.order_by_applied, self.limit_applied, self.offset_applied
            ));
        }
        match self.cache_status {
            CacheStatus::MissDisabled => lines.push("DEBUG cache=disabled".to_string()),
            CacheStatus::MissNotFound => lines.push("DEBUG cache=miss".to_string()),
            CacheStatus::Hit => lines.push(format!(
                "DEBUG cache=hit age_ms={:.1} saved_ms={:.1}",
                self.cache_age_ms, self.cache_saved_ms
            )),
        }
        lines
    }
}
