//! Statistics query orchestration.
//!
//! A request is processed in four steps: resolve the return columns into an
//! output schema, spawn one unit per partition, gather every unit's outcome
//! into a per-partition code, and assemble the response. Partition units share
//! nothing mutable; each returns its own rows and counters and the gather loop
//! is the only place results are merged.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, warn, Instrument};

use crate::config::StatsConfig;
use crate::error::{ErrorCode, QueryError, RowError, StatsError, StorageError};
use crate::keys::{EdgeType, PartitionId, SpaceId, TagType, VertexId};
use crate::kv::GraphKvStore;
use crate::metrics::StatsMetrics;
use crate::reader::PartitionReader;
use crate::row::{encode_row, FieldAccessor, RowReader};
use crate::schema::{EntityRef, FieldDef, SchemaDescriptor, SchemaProvider};
use crate::stats::{StatAccumulator, StatType};
use crate::value::{Value, ValueType};

/// Version stamped on every output row and on the response schema.
pub const OUTPUT_SCHEMA_VERSION: u64 = 0;

/// Which record a return column reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropOwner {
    /// A tag on the source vertex; requires `owner_tag_type`.
    Source,
    Edge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnColumn {
    pub owner: PropOwner,
    pub field_name: String,
    pub stat: StatType,
    #[serde(default)]
    pub owner_tag_type: Option<TagType>,
}

impl ReturnColumn {
    pub fn source(tag_type: TagType, field_name: impl Into<String>, stat: StatType) -> Self {
        Self {
            owner: PropOwner::Source,
            field_name: field_name.into(),
            stat,
            owner_tag_type: Some(tag_type),
        }
    }

    pub fn edge(field_name: impl Into<String>, stat: StatType) -> Self {
        Self {
            owner: PropOwner::Edge,
            field_name: field_name.into(),
            stat,
            owner_tag_type: None,
        }
    }
}

/// Granularity of the produced rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatsScope {
    /// One row per requested vertex of every successful partition.
    #[default]
    PerVertex,
    /// A single row folding every vertex of every successful partition.
    Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStatsRequest {
    pub space_id: SpaceId,
    /// Vertex ids grouped by owning partition; per-partition order is kept.
    pub ids_by_partition: BTreeMap<PartitionId, Vec<VertexId>>,
    /// Negative values aggregate incoming edges of `-edge_type`.
    pub edge_type: EdgeType,
    pub return_columns: Vec<ReturnColumn>,
    #[serde(default)]
    pub scope: StatsScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionCode {
    pub partition_id: PartitionId,
    pub code: ErrorCode,
}

#[derive(Debug, Clone)]
pub struct QueryStatsResponse {
    /// One entry per requested partition, ordered by partition id.
    pub codes: Vec<PartitionCode>,
    pub schema: Arc<SchemaDescriptor>,
    /// Encoded output rows, grouped by partition in completion order.
    pub rows: Vec<Vec<u8>>,
}

impl QueryStatsResponse {
    pub fn all_succeeded(&self) -> bool {
        self.codes.iter().all(|c| c.code.is_success())
    }

    pub fn code_for(&self, partition_id: PartitionId) -> Option<ErrorCode> {
        self.codes
            .iter()
            .find(|c| c.partition_id == partition_id)
            .map(|c| c.code)
    }

    /// Decodes every row against the response schema.
    pub fn decoded_rows(&self) -> Result<Vec<Vec<Value>>, RowError> {
        self.rows
            .iter()
            .map(|row| RowReader::with_schema(row, Arc::clone(&self.schema))?.values())
            .collect()
    }
}

#[derive(Debug, Clone)]
struct ResolvedColumn {
    field_name: String,
    input: ValueType,
    stat: StatType,
}

/// Output layout plus the per-entity column groups that feed it.
#[derive(Debug)]
struct ColumnPlan {
    output: Arc<SchemaDescriptor>,
    columns: Vec<ResolvedColumn>,
    /// Output indices fed by each tag, in first-requested order.
    by_tag: Vec<(TagType, Vec<usize>)>,
    edge_columns: Vec<usize>,
}

impl ColumnPlan {
    fn accumulators(&self) -> Vec<StatAccumulator> {
        self.columns
            .iter()
            .map(|c| StatAccumulator::new(c.stat, c.input))
            .collect()
    }

    fn finish_row(&self, accumulators: &[StatAccumulator]) -> Result<Vec<u8>, RowError> {
        let values: Vec<Value> = accumulators.iter().map(StatAccumulator::finalize).collect();
        encode_row(self.output.version, &values)
    }
}

fn resolve_columns(
    schemas: &dyn SchemaProvider,
    space_id: SpaceId,
    edge_type: EdgeType,
    columns: &[ReturnColumn],
) -> Result<ColumnPlan, QueryError> {
    let mut sources: Vec<(EntityRef, ResolvedColumn, ValueType)> = Vec::new();
    let mut edges: Vec<(EntityRef, ResolvedColumn, ValueType)> = Vec::new();
    for column in columns {
        let (entity, bucket) = match column.owner {
            PropOwner::Source => {
                let tag = column.owner_tag_type.ok_or_else(|| {
                    QueryError::InvalidRequest(format!(
                        "source column '{}' has no owner tag type",
                        column.field_name
                    ))
                })?;
                (EntityRef::Tag(tag), &mut sources)
            }
            PropOwner::Edge => (EntityRef::Edge(edge_type), &mut edges),
        };
        let schema = schemas.resolve(space_id, entity, None).ok_or_else(|| {
            QueryError::InvalidRequest(format!("no schema for {entity:?} in space {space_id}"))
        })?;
        let field = schema
            .field_index(&column.field_name)
            .and_then(|index| schema.field(index))
            .ok_or_else(|| {
                QueryError::InvalidRequest(format!(
                    "unknown field '{}' on {entity:?}",
                    column.field_name
                ))
            })?;
        let output = column.stat.output_type(field.value_type).ok_or_else(|| {
            QueryError::InvalidRequest(format!(
                "{} cannot aggregate {} field '{}'",
                column.stat, field.value_type, column.field_name
            ))
        })?;
        bucket.push((
            entity,
            ResolvedColumn {
                field_name: column.field_name.clone(),
                input: field.value_type,
                stat: column.stat,
            },
            output,
        ));
    }

    let mut plan = ColumnPlan {
        output: Arc::new(SchemaDescriptor::new(OUTPUT_SCHEMA_VERSION, Vec::new())),
        columns: Vec::with_capacity(sources.len() + edges.len()),
        by_tag: Vec::new(),
        edge_columns: Vec::new(),
    };
    let mut fields = Vec::with_capacity(sources.len() + edges.len());
    for (entity, column, output) in sources.into_iter().chain(edges) {
        let index = plan.columns.len();
        match entity {
            EntityRef::Tag(tag) => match plan.by_tag.iter_mut().find(|(t, _)| *t == tag) {
                Some((_, indices)) => indices.push(index),
                None => plan.by_tag.push((tag, vec![index])),
            },
            EntityRef::Edge(_) => plan.edge_columns.push(index),
        }
        let name = output_name(&fields, &column);
        fields.push(FieldDef::new(name, output));
        plan.columns.push(column);
    }
    plan.output = Arc::new(SchemaDescriptor::new(OUTPUT_SCHEMA_VERSION, fields));
    Ok(plan)
}

/// Output field name for `column`: the source field name, qualified with the
/// reducer (then the position) when an earlier output field already uses it.
fn output_name(fields: &[FieldDef], column: &ResolvedColumn) -> String {
    let taken = |name: &str| fields.iter().any(|f| f.name == name);
    if !taken(&column.field_name) {
        return column.field_name.clone();
    }
    let qualified = format!(
        "{}_{}",
        column.field_name,
        column.stat.name().to_ascii_lowercase()
    );
    if !taken(&qualified) {
        return qualified;
    }
    format!("{qualified}_{}", fields.len())
}

/// Per-field failure absorbed while folding one row.
#[derive(Debug, Error)]
enum FoldError {
    #[error(transparent)]
    Row(#[from] RowError),
    #[error(transparent)]
    Stats(#[from] StatsError),
}

/// Folds the named field of `row` into `acc`. A field the row's schema does
/// not declare contributes the column's typed default.
fn fold_field(
    row: &RowReader<'_>,
    column: &ResolvedColumn,
    acc: &mut StatAccumulator,
) -> Result<(), FoldError> {
    let value = match row.field_index(&column.field_name) {
        Some(index) => row.read_value(index)?,
        None => column.input.default_value(),
    };
    acc.fold(&value)?;
    Ok(())
}

/// Everything a partition unit needs, shared read-only across units.
struct UnitContext {
    kv: Arc<dyn GraphKvStore>,
    schemas: Arc<dyn SchemaProvider>,
    plan: Arc<ColumnPlan>,
    space_id: SpaceId,
    edge_type: EdgeType,
    scope: StatsScope,
    config: StatsConfig,
}

#[derive(Debug, Default)]
struct PartitionOutcome {
    rows: Vec<Vec<u8>>,
    rollup: Option<Vec<StatAccumulator>>,
    vertices: u64,
    tag_rows: u64,
    edges: u64,
    codec_errors: u64,
}

impl UnitContext {
    async fn run(
        &self,
        partition_id: PartitionId,
        vertices: &[VertexId],
    ) -> Result<PartitionOutcome, StorageError> {
        let reader = PartitionReader::new(Arc::clone(&self.kv), self.space_id, partition_id);
        let mut outcome = PartitionOutcome {
            rows: Vec::with_capacity(vertices.len().min(self.config.scan_page_hint)),
            ..PartitionOutcome::default()
        };
        let mut rollup = match self.scope {
            StatsScope::Request => Some(self.plan.accumulators()),
            StatsScope::PerVertex => None,
        };

        for &vertex_id in vertices {
            let mut accs = self.plan.accumulators();
            self.fold_vertex(&reader, vertex_id, &mut accs, &mut outcome)
                .await?;
            outcome.vertices += 1;
            match rollup.as_mut() {
                Some(total) => {
                    for (into, from) in total.iter_mut().zip(&accs) {
                        if let Err(err) = into.merge(from) {
                            warn!(error = %err, partition_id, vertex_id, "rollup merge failed");
                            outcome.codec_errors += 1;
                        }
                    }
                }
                None => match self.plan.finish_row(&accs) {
                    Ok(row) => outcome.rows.push(row),
                    Err(err) => {
                        warn!(error = %err, partition_id, vertex_id, "dropping unencodable output row");
                        outcome.codec_errors += 1;
                    }
                },
            }
        }
        outcome.rollup = rollup;
        Ok(outcome)
    }

    async fn fold_vertex(
        &self,
        reader: &PartitionReader,
        vertex_id: VertexId,
        accs: &mut [StatAccumulator],
        outcome: &mut PartitionOutcome,
    ) -> Result<(), StorageError> {
        let partition_id = reader.partition_id();
        for (tag_type, indices) in &self.plan.by_tag {
            let Some(tag) = reader.read_tag_props(vertex_id, *tag_type).await? else {
                continue;
            };
            let row = match RowReader::decode(
                &tag.row,
                self.schemas.as_ref(),
                self.space_id,
                EntityRef::Tag(*tag_type),
            ) {
                Ok(row) => row,
                Err(err) => {
                    warn!(error = %err, partition_id, vertex_id, tag_type, "skipping undecodable tag row");
                    outcome.codec_errors += 1;
                    continue;
                }
            };
            outcome.tag_rows += 1;
            for &index in indices {
                if let Err(err) = fold_field(&row, &self.plan.columns[index], &mut accs[index]) {
                    warn!(error = %err, partition_id, vertex_id, tag_type, "skipping tag field");
                    outcome.codec_errors += 1;
                }
            }
        }

        if self.plan.edge_columns.is_empty() {
            return Ok(());
        }
        let edges = reader.read_edges(vertex_id, self.edge_type).await?;
        let limit = self.config.edge_limit();
        let mut folded = 0usize;
        for item in edges.iter() {
            if folded >= limit {
                break;
            }
            let (key, value) = match item {
                Ok(edge) => edge,
                Err(err) => {
                    warn!(error = %err, partition_id, vertex_id, "skipping malformed edge key");
                    outcome.codec_errors += 1;
                    continue;
                }
            };
            outcome.edges += 1;
            let row = match RowReader::decode(
                value,
                self.schemas.as_ref(),
                self.space_id,
                EntityRef::Edge(self.edge_type),
            ) {
                Ok(row) => row,
                Err(err) => {
                    warn!(error = %err, partition_id, vertex_id, dst = key.dst, rank = key.rank, "skipping undecodable edge row");
                    outcome.codec_errors += 1;
                    continue;
                }
            };
            folded += 1;
            for &index in &self.plan.edge_columns {
                if let Err(err) = fold_field(&row, &self.plan.columns[index], &mut accs[index]) {
                    warn!(error = %err, partition_id, vertex_id, dst = key.dst, "skipping edge field");
                    outcome.codec_errors += 1;
                }
            }
        }
        Ok(())
    }
}

/// Entry point for statistics requests.
pub struct QueryStatsProcessor {
    kv: Arc<dyn GraphKvStore>,
    schemas: Arc<dyn SchemaProvider>,
    config: StatsConfig,
    metrics: Arc<StatsMetrics>,
}

impl QueryStatsProcessor {
    pub fn new(
        kv: Arc<dyn GraphKvStore>,
        schemas: Arc<dyn SchemaProvider>,
        config: StatsConfig,
    ) -> Self {
        Self {
            kv,
            schemas,
            config,
            metrics: Arc::new(StatsMetrics::new()),
        }
    }

    /// Shares an externally owned counter set.
    pub fn with_metrics(mut self, metrics: Arc<StatsMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<StatsMetrics> {
        &self.metrics
    }

    /// Runs one statistics request.
    ///
    /// Only request-shape problems return `Err`. Partition failures are
    /// reported through [`QueryStatsResponse::codes`] and contribute no rows.
    pub async fn process(
        &self,
        req: &QueryStatsRequest,
    ) -> Result<QueryStatsResponse, QueryError> {
        let plan = Arc::new(resolve_columns(
            self.schemas.as_ref(),
            req.space_id,
            req.edge_type,
            &req.return_columns,
        )?);
        self.metrics.record_request();

        if plan.columns.is_empty() {
            debug!(space_id = req.space_id, "no return columns; skipping partition reads");
            return Ok(QueryStatsResponse {
                codes: req
                    .ids_by_partition
                    .keys()
                    .map(|&partition_id| PartitionCode {
                        partition_id,
                        code: ErrorCode::Succeeded,
                    })
                    .collect(),
                schema: Arc::clone(&plan.output),
                rows: Vec::new(),
            });
        }

        let ctx = Arc::new(UnitContext {
            kv: Arc::clone(&self.kv),
            schemas: Arc::clone(&self.schemas),
            plan: Arc::clone(&plan),
            space_id: req.space_id,
            edge_type: req.edge_type,
            scope: req.scope,
            config: self.config,
        });
        let inflight = Arc::new(Semaphore::new(self.config.max_inflight_partitions.max(1)));
        let mut units = FuturesUnordered::new();
        for (&partition_id, vertices) in &req.ids_by_partition {
            let ctx = Arc::clone(&ctx);
            let inflight = Arc::clone(&inflight);
            let vertices = vertices.clone();
            let span = info_span!(
                "holo_graph.query_stats_partition",
                space_id = req.space_id,
                partition_id,
                vertices = vertices.len()
            );
            debug!(space_id = req.space_id, partition_id, "dispatching partition unit");
            let handle = tokio::spawn(
                async move {
                    let _permit = inflight.acquire_owned().await.ok();
                    ctx.run(partition_id, &vertices).await
                }
                .instrument(span),
            );
            units.push(async move { (partition_id, handle.await) });
        }

        let mut codes = Vec::with_capacity(req.ids_by_partition.len());
        let mut rows = Vec::new();
        let mut rollup: Option<Vec<StatAccumulator>> = None;
        while let Some((partition_id, joined)) = units.next().await {
            let code = match joined {
                Ok(Ok(outcome)) => {
                    self.metrics
                        .record_scan(outcome.vertices, outcome.tag_rows, outcome.edges);
                    self.metrics.record_codec_errors(outcome.codec_errors);
                    debug!(
                        partition_id,
                        rows = outcome.rows.len(),
                        codec_errors = outcome.codec_errors,
                        "partition unit finished"
                    );
                    rows.extend(outcome.rows);
                    if let Some(partial) = outcome.rollup {
                        merge_rollup(&mut rollup, partial, partition_id);
                    }
                    ErrorCode::Succeeded
                }
                Ok(Err(err)) => {
                    warn!(error = %err, partition_id, "partition unit failed");
                    ErrorCode::from(&err)
                }
                Err(err) => {
                    warn!(error = %err, partition_id, "partition unit did not complete");
                    ErrorCode::Internal
                }
            };
            self.metrics.record_partition(code.is_success());
            codes.push(PartitionCode { partition_id, code });
        }
        codes.sort_by_key(|c| c.partition_id);

        if let Some(total) = rollup {
            match plan.finish_row(&total) {
                Ok(row) => rows.push(row),
                Err(err) => warn!(error = %err, space_id = req.space_id, "dropping unencodable rollup row"),
            }
        }
        self.metrics.record_rows_emitted(rows.len() as u64);
        Ok(QueryStatsResponse {
            codes,
            schema: Arc::clone(&plan.output),
            rows,
        })
    }
}

fn merge_rollup(
    total: &mut Option<Vec<StatAccumulator>>,
    partial: Vec<StatAccumulator>,
    partition_id: PartitionId,
) {
    if let Some(running) = total.as_mut() {
        for (into, from) in running.iter_mut().zip(&partial) {
            if let Err(err) = into.merge(from) {
                warn!(error = %err, partition_id, "rollup merge failed");
            }
        }
        return;
    }
    *total = Some(partial);
}
