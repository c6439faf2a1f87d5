mod mock_pipeline;
