/*!
# Water Quality Analysis & Monitoring

Turns laboratory water-quality reports into structured assessments, served over HTTP.

## Overview

Operators upload lab reports as CSV, Excel or PDF files. Each upload is parsed into a
table, the columns are matched against the known water-quality parameters, every
parameter is checked against its safe range, short-term trends are extrapolated, an
overall pollution label is assigned and the result is stored as an immutable report.
Reports can be listed, fetched, and downloaded as PDF or XLSX.

## Architecture

### Analysis pipeline
```text
bytes --load_dataset--> RawDataset --extract--> [ParameterSeries]
      --evaluate--> [ParameterSummary] --forecast_all/score--> MlInsights
      --assemble--> UploadReport --append--> ReportStore
```
- **Loader** - CSV via `csv`, Excel via `calamine`, PDF text via `pdf-extract`
- **Extractor** - column name normalisation, timestamp detection, gap filling
- **Evaluator** - safe-range and critical-limit classification with directives
- **Forecast** - least-squares linear trend, three steps ahead
- **Scoring** - weighted status score, optional pre-trained linear model
- **Report** - alerts, recommendations and site status

### Service layer (feature `web`)
- axum router with bearer-token sessions
- Accounts stored in a JSON file, passwords hashed with Argon2id keyed by the server secret
- New accounts wait for administrator approval

### Persistence
- Report history in memory, optionally mirrored to a gzip + bincode snapshot
- PDF export via `printpdf`, XLSX export via `rust_xlsxwriter`

## Modules

- **models**: Data shapes shared by every stage
- **error**: Error enums per subsystem
- **parameters**: Column synonyms and the threshold table
- **loader**: File bytes to raw table
- **extractor**: Raw table to parameter series
- **evaluator**: Series to status summary
- **forecast**: Linear trend extrapolation
- **scoring**: Pollution score, label and optional model
- **report**: Report assembly
- **pipeline**: The `Analyzer` that runs all of the above
- **store**: Report history
- **saving**: Snapshot encoding
- **downloader**: PDF and XLSX export
- **login**: Accounts, roles and sessions
- **config**: Command line and analysis configuration
- **app**: Routing and handlers

## REST API Endpoints

- `GET /api/health`, `GET /api/ml/status`
- `POST /api/auth/register`, `POST /api/auth/login`, `POST /api/auth/logout`, `GET /api/auth/me`
- `GET /api/admin/pending-users`, `POST /api/admin/users/{username}/approve`
- `POST /api/uploads/analyze` - multipart upload, field `file`
- `GET /api/reports`, `GET /api/reports/latest`, `GET /api/reports/{id}`
- `GET /api/reports/latest/pdf`, `GET /api/reports/{id}/pdf`, `GET /api/reports/{id}/xlsx`
*/

#[cfg(feature = "web")]
pub mod app;
pub mod config;
pub mod downloader;
pub mod error;
pub mod evaluator;
pub mod extractor;
pub mod forecast;
pub mod loader;
pub mod login;
pub mod models;
pub mod parameters;
pub mod pipeline;
pub mod report;
pub mod saving;
pub mod scoring;
pub mod store;

pub use error::{AnalysisError, AuthError, ConfigError, ExportError, ModelError, StoreError};
pub use models::*;
pub use pipeline::Analyzer;
pub use store::{MemoryReportStore, ReportStore, SnapshotReportStore};
